//! selector language: parse, type-check and compile tree patterns
//!
//! a selector is a chain of segments joined by combinators:
//!
//! ```text
//! @FrameLayout > Button[text = `OK`] + $[id = "confirm"]
//! ```
//!
//! - `name` filters on the node kind (`Button` matches `android.widget.Button`)
//! - `[expr]` is a boolean predicate over the node's attributes
//! - `>` `>>` `<` `<<` `+` `-` `~` walk child / descendant / ancestor /
//!   sibling relations, optionally constrained by an offset (`>2`),
//!   a list (`>(1,3)`) or a formula (`>(2n+1)`)
//! - `@` anchors the first segment at the tree root, `$` marks the target
//!
//! compilation is pure: the same text always yields the same [`Selector`].

pub mod check;
pub mod error;
pub mod expr;
pub mod parser;
pub mod types;

pub use error::{CompileError, CompileErrorKind, Span};
pub use expr::{Term, ValueType};
pub use types::{
    Combinator, CombinatorKind, FastKey, FastQueryEntry, IndexPredicate, Segment, Selector,
};

/// compile selector text into a checked [`Selector`]
pub fn compile(source: &str) -> Result<Selector, CompileError> {
    let raw = parser::parse_selector(source)?;
    check::check_selector(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "Button[text=`OK`] + [id=`confirm`]",
        "@FrameLayout > $LinearLayout >> TextView[text ^= 'Skip' && clickable]",
        "[vid='close' || text='Close'] <2 *",
        "ListView >(2n+1) [childCount > 0] - [desc *= \"ad\"]",
        "[text ~= 'Skip \\\\d+s'] < [index = parent.childCount.minus(1)]",
        "A ~(1,3) B[text = prev.text && getPrev(2) != null]",
        "View[width * 2 >= height && -left < 0]",
    ];

    #[test]
    fn test_compile_is_deterministic() {
        for src in SAMPLES {
            let a = compile(src).unwrap();
            let b = compile(src).unwrap();
            assert_eq!(a, b, "{}", src);
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for src in SAMPLES {
            let sel = compile(src).unwrap();
            let rendered = sel.to_string();
            let again = compile(&rendered)
                .unwrap_or_else(|e| panic!("{} -> {}: {}", src, rendered, e));
            assert_eq!(sel, again, "{} -> {}", src, rendered);
        }
    }

    #[test]
    fn test_canonical_display() {
        let sel = compile("Button[text=`OK`]+[id=`confirm`]").unwrap();
        assert_eq!(
            sel.to_string(),
            "Button[text = \"OK\"] + [id = \"confirm\"]"
        );

        let sel = compile("@A > $B >(2n+1) *").unwrap();
        assert_eq!(sel.to_string(), "@A > $B >(2n+1) *");
    }

    #[test]
    fn test_compile_error_carries_span() {
        let err = compile("Button[text = ]").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));
        assert_eq!(err.span.start, 14);
    }
}
