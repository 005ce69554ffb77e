//! A trivial textual post-processor that nudges the emitted dialect into
//! compilable C++: `this` is not a valid variable name there, the cast
//! syntax maps onto `reinterpret_cast`, and lines tagged `//CPP:` become
//! active. Plain find-and-replace is all this is; it runs over the
//! emitter's output, never over user source.

pub fn convert(content: &str) -> String {
    content
        .replace("this", "_this")
        .replace("cast<", "reinterpret_cast<")
        .replace("//CPP:", " ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn substitutions() {
        assert_eq!(
            convert("C this; this.__vtable = cast<void*>(0); //CPP: x"),
            "C _this; _this.__vtable = reinterpret_cast<void*>(0);   x"
        );
    }
}
