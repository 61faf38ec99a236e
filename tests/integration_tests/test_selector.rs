// selector compilation through the public API

use axsel::selector::{compile, CompileErrorKind};

#[test]
fn test_compile_dialog_selectors() {
    for src in [
        "Button[text=`OK`] + [vid=`confirm`]",
        "@FrameLayout > LinearLayout > Button[clickable]",
        "ListView >(2n+1) FrameLayout > TextView[text.length > 2]",
        "[text='two'] < FrameLayout - FrameLayout",
    ] {
        let a = compile(src).unwrap_or_else(|e| panic!("{}: {}", src, e));
        let b = compile(src).unwrap();
        assert_eq!(a, b, "{}", src);
    }
}

#[test]
fn test_canonical_form_recompiles() {
    let sel = compile("Button[text=`OK`]+[vid=`confirm`]").unwrap();
    let again = compile(&sel.to_string()).unwrap();
    assert_eq!(sel, again);
}

#[test]
fn test_unknown_attribute_is_rejected() {
    let err = compile("Button[txet='OK']").unwrap_err();
    assert!(matches!(err.kind, CompileErrorKind::UnknownIdentifier { .. }), "{:?}", err);
    assert!(err.render("Button[txet='OK']").contains("txet"));
}

#[test]
fn test_syntax_error_has_span() {
    let src = "Button[text=";
    let err = compile(src).unwrap_err();
    assert!(err.span.start <= src.len());
    assert!(err.span.end <= src.len());
}

#[test]
fn test_type_mismatch_is_rejected() {
    assert!(compile("[childCount = 'three']").is_err());
    assert!(compile("[text > 3]").is_err());
}
