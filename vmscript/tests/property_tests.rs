use proptest::prelude::*;
use vmscript::keybind::{text_keys, Keymap};
use vmscript::screen::diff;
use vmscript::script::stmt::{LineType, ParsedLine};
use vmscript::script::{Expander, Parser};

proptest! {
    /// Ensure the parser never panics on arbitrary valid UTF-8 input; it
    /// should return Ok or Err but not panic.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = Parser::new().parse(&s);
    }

    /// Directive-shaped noise must not panic either.
    #[test]
    fn directive_noise_does_not_panic(s in "<[a-z\\-+ \"0-9=]{0,24}>") {
        let _ = Parser::new().parse(&s);
    }
}

const VOCABULARY: &[&str] = &[
    "ls -la",
    "",
    "# note",
    "<retry 2>",
    "<repeat 3>",
    "<if-found \"ok\">",
    "<if-not-found \"err\" 2s>",
    "<else>",
    "<end-if>",
    "<while-found \"busy\" 5s>",
    "<enter>",
    "N=1",
    "\\<literal>",
];

fn assert_blocks_clean(lines: &[ParsedLine]) {
    for line in lines {
        if let Some(d) = &line.directive {
            for block in d.blocks() {
                for inner in block {
                    assert!(
                        !matches!(inner.line_type, LineType::Empty | LineType::Comment),
                        "block of line {} holds {:?}",
                        line.line_number,
                        inner
                    );
                }
                assert_blocks_clean(block);
            }
        }
    }
}

proptest! {
    /// Implicit blocks never contain blank or comment lines, and every
    /// source line is accounted for in the metadata.
    #[test]
    fn implicit_blocks_have_no_blank_lines(
        picks in prop::collection::vec(0..VOCABULARY.len(), 0..40)
    ) {
        let src: Vec<&str> = picks.iter().map(|&i| VOCABULARY[i]).collect();
        let src = src.join("\n");
        if let Ok(script) = Parser::new().parse(&src) {
            assert_blocks_clean(&script.lines);
            let m = &script.metadata;
            prop_assert_eq!(
                m.text_lines + m.directive_lines + m.assignment_lines + m.comment_lines + m.empty_lines,
                m.total_lines
            );
        }
    }
}

proptest! {
    /// Text with no `$` and no braces passes through unchanged.
    #[test]
    fn expansion_identity(s in "[^${}\\\\]*") {
        let mut e = Expander::new();
        prop_assert_eq!(e.expand(&s), s);
    }

    /// `\$NAME` is always literal, whatever NAME is bound to.
    #[test]
    fn escaped_dollar_is_literal(name in "[A-Z][A-Z0-9_]{0,8}", value in "[a-z]{0,8}") {
        let mut e = Expander::new();
        e.set(name.as_str(), value.as_str());
        let out = e.expand(&format!("\\${name}"));
        prop_assert_eq!(out, format!("${name}"));
    }

    /// Positional parameters bound in a scoped copy never leak back.
    #[test]
    fn scoped_copy_is_isolated(args in prop::collection::vec("[a-z]{1,6}", 0..5)) {
        let parent = Expander::new();
        let mut child = parent.scoped_copy(&args);
        child.set("LOCAL", "x");
        for (i, a) in args.iter().enumerate() {
            prop_assert_eq!(child.get(&(i + 1).to_string()), Some(a.as_str()));
            prop_assert!(!parent.is_set(&(i + 1).to_string()));
        }
        prop_assert!(!parent.is_set("LOCAL"));
    }
}

proptest! {
    /// Any letters, digits and spaces can be typed one key per character.
    #[test]
    fn plain_text_is_typeable(s in "[a-zA-Z0-9 ]{0,40}") {
        prop_assert_eq!(text_keys(&s).len(), s.chars().count());
    }

    /// Single letters and F-keys resolve, with and without a ctrl modifier.
    #[test]
    fn chords_resolve(key in "[a-z]|f[1-9]|f1[0-2]") {
        let map = Keymap::new();
        prop_assert!(map.is_known(&key));
        let chord = format!("ctrl+{key}");
        prop_assert!(map.is_known(&chord));
    }
}

proptest! {
    /// A screen compared with itself has nothing new.
    #[test]
    fn identical_screens_have_no_new_lines(rows in prop::collection::vec("[a-z ]{0,12}", 0..25)) {
        let d = diff(Some(rows.as_slice()), &rows);
        prop_assert!(d.new_lines.is_empty());
    }

    /// After scrolling by `k`, exactly the appended rows are new, bottom first.
    #[test]
    fn scrolled_screen_reports_appended_rows(n in 3usize..25, k in 1usize..10, fresh in 0usize..6) {
        let k = k.min(n - 1);
        let prev: Vec<String> = (0..n).map(|i| format!("row {i}")).collect();
        let appended: Vec<String> = (0..fresh).map(|j| format!("new {j}")).collect();
        let cur: Vec<String> = prev[k..].iter().cloned().chain(appended.iter().cloned()).collect();

        let d = diff(Some(prev.as_slice()), &cur);
        prop_assert_eq!(d.offset, Some(k as isize));
        let expected: Vec<String> = appended.into_iter().rev().collect();
        prop_assert_eq!(d.new_lines, expected);
    }

    /// With no previous capture, every non-blank row is new.
    #[test]
    fn first_capture_is_all_new(rows in prop::collection::vec("[a-z ]{0,12}", 0..25)) {
        let d = diff(None, &rows);
        let non_blank = rows.iter().filter(|r| !r.trim().is_empty()).count();
        prop_assert_eq!(d.new_lines.len(), non_blank);
    }
}
