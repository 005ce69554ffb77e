use std::collections::HashMap;

use crate::lexing::tokens::Keyword;

pub fn new() -> HashMap<&'static str, Keyword> {
    [
        Keyword::Abstract,
        Keyword::Break,
        Keyword::Case,
        Keyword::Cast,
        Keyword::Char,
        Keyword::Class,
        Keyword::Continue,
        Keyword::Default,
        Keyword::Do,
        Keyword::Double,
        Keyword::Else,
        Keyword::For,
        Keyword::If,
        Keyword::Int,
        Keyword::Interface,
        Keyword::Override,
        Keyword::Private,
        Keyword::Protected,
        Keyword::Public,
        Keyword::Return,
        Keyword::Struct,
        Keyword::Switch,
        Keyword::Typedef,
        Keyword::Virtual,
        Keyword::Void,
        Keyword::While,
    ]
    .iter()
    .map(|&keyword| (keyword.as_str(), keyword))
    .collect()
}
