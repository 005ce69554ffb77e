use std::collections::HashMap;

pub fn new() -> HashMap<char, char> {
    [
        ('n', '\n'),
        ('r', '\r'),
        ('t', '\t'),
        ('0', '\0'),
        ('\\', '\\'),
        ('\'', '\''),
        ('"', '"'),
    ]
    .iter()
    .cloned()
    .collect()
}
