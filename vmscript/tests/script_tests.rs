//! End-to-end script runs against a simulated VM.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use vmscript::keybind::KeyCode;
use vmscript::mode::{DryRunMode, LiveMode, ModeError, Ocr, Transport};
use vmscript::ocr::OcrError;
use vmscript::script::stmt::ImageFormat;
use vmscript::script::{Executor, ExecutorSettings, Expander, Parser};

// ── Simulated VM ──────────────────────────────────────────────────────────────

/// Keys go into `keys`; each screendump advances to the next screen.
#[derive(Default)]
struct Vm {
    keys: Vec<String>,
    screens: VecDeque<Vec<String>>,
    current: Vec<String>,
}

impl Vm {
    fn typed(&self) -> String {
        let mut out = String::new();
        for k in &self.keys {
            match k.as_str() {
                "ret" => out.push('\n'),
                "spc" => out.push(' '),
                "minus" => out.push('-'),
                "dot" => out.push('.'),
                "slash" => out.push('/'),
                k if k.len() == 1 => out.push_str(k),
                k => match k.strip_prefix("shift-") {
                    Some(c) if c.len() == 1 => out.push_str(&c.to_uppercase()),
                    _ => out.push_str(&format!("<{k}>")),
                },
            }
        }
        out
    }
}

#[derive(Clone)]
struct VmTransport(Rc<RefCell<Vm>>);

impl Transport for VmTransport {
    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
        self.0.borrow_mut().keys.push(key.to_string());
        Ok(())
    }
    fn screendump(&mut self, _path: &Path, _format: ImageFormat) -> Result<(), ModeError> {
        let mut vm = self.0.borrow_mut();
        if let Some(next) = vm.screens.pop_front() {
            vm.current = next;
        }
        Ok(())
    }
}

struct VmOcr(Rc<RefCell<Vm>>);

impl Ocr for VmOcr {
    fn recognize(&mut self, _image: &Path) -> Result<Vec<String>, OcrError> {
        Ok(self.0.borrow().current.clone())
    }
}

fn vm(screens: &[&[&str]]) -> Rc<RefCell<Vm>> {
    Rc::new(RefCell::new(Vm {
        screens: screens
            .iter()
            .map(|s| s.iter().map(|l| l.to_string()).collect())
            .collect(),
        ..Vm::default()
    }))
}

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        poll_interval: Duration::from_millis(1),
        retry_delay: Duration::from_millis(1),
        watch_timeout: Duration::from_millis(200),
        switch_timeout: Duration::from_millis(50),
        timeout: Some(Duration::from_secs(10)),
    }
}

fn live(state: &Rc<RefCell<Vm>>) -> LiveMode<VmTransport, VmOcr> {
    LiveMode::new(VmTransport(Rc::clone(state)), VmOcr(Rc::clone(state)))
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn run_file(path: &Path, state: &Rc<RefCell<Vm>>) -> vmscript::script::ExecutionResult {
    let src = fs::read_to_string(path).unwrap();
    let script = Parser::new().parse(&src).unwrap();
    Executor::new(live(state), Expander::new(), settings())
        .with_script_path(path)
        .execute(&script)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn login_flow() {
    let state = vm(&[
        &["Booting..."],
        &["Booting...", "host login:"],
        &["host login: root", "Password:"],
        &["host login: root", "Password:", "root@host:~# "],
    ]);
    let src = "\
USER=root
<watch \"login:\" 1s>
$USER
<watch \"Password:\" 1s>
secret
<switch timeout=1s>
<case \"# \">
uname -a
<end-case>
<case \"Login incorrect\">
<exit 2>
<end-switch>";
    let script = Parser::new().parse(src).unwrap();
    let result = Executor::new(live(&state), Expander::new(), settings()).execute(&script);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "root\nsecret\nuname -a\n");
}

#[test]
fn include_shares_scope_and_functions() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "lib.vms",
        "<function greet>\nhi $1 $GREETING_SUFFIX\n<end-function>\nFROM_LIB=yes\n",
    );
    let main = write(
        dir.path(),
        "main.vms",
        "GREETING_SUFFIX=there\n<include \"lib.vms\">\n<call greet bob>\n$FROM_LIB\n",
    );
    let state = vm(&[]);
    let result = run_file(&main, &state);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "hi bob there\nyes\n");
}

#[test]
fn include_path_is_relative_to_including_script() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    write(dir.path(), "sub/inner.vms", "<include \"leaf.vms\">\n");
    write(dir.path(), "sub/leaf.vms", "leaf\n");
    let main = write(dir.path(), "main.vms", "<include \"sub/inner.vms\">\n");
    let state = vm(&[]);
    let result = run_file(&main, &state);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "leaf\n");
}

#[test]
fn include_cycle_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.vms", "a\n<include \"b.vms\">\n");
    write(dir.path(), "b.vms", "b\n<include \"a.vms\">\n");
    let state = vm(&[]);
    let result = run_file(&dir.path().join("a.vms"), &state);
    assert!(!result.success);
    let err = result.error.unwrap();
    assert!(err.contains("include cycle"), "{err}");
    assert_eq!(state.borrow().typed(), "a\nb\n");
}

#[test]
fn missing_include_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.vms", "<include \"nope.vms\">\n");
    let result = run_file(&main, &vm(&[]));
    let err = result.error.unwrap();
    assert!(err.starts_with("line 1: cannot read"), "{err}");
    assert!(err.contains("nope.vms"), "{err}");
}

#[test]
fn include_parse_error_names_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.vms", "<function broken>\n");
    let main = write(dir.path(), "main.vms", "<include \"bad.vms\">\n");
    let err = run_file(&main, &vm(&[])).error.unwrap();
    assert!(err.contains("bad.vms"), "{err}");
    assert!(err.contains("broken"), "{err}");
}

#[test]
fn break_in_included_file_stays_in_that_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "inc.vms", "a\n<break>\nb\n");

    let top = write(dir.path(), "top.vms", "<include \"inc.vms\">\nd\n");
    let state = vm(&[]);
    let result = run_file(&top, &state);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "a\nb\nd\n");

    let in_case = write(
        dir.path(),
        "case.vms",
        "<switch timeout=1s>\n<case \"x\">\n<include \"inc.vms\">\nc\n<end-case>\n<end-switch>\nd\n",
    );
    let state = vm(&[&["x"]]);
    let result = run_file(&in_case, &state);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "a\nb\nc\nd\n");
}

#[test]
fn nested_calls_restore_caller_scope() {
    let src = "\
<function inner>
in-$1
<end-function>
<function outer>
out-$1
<call inner deep>
after-$1
<end-function>
<call outer top>
end-$1";
    let state = vm(&[]);
    let script = Parser::new().parse(src).unwrap();
    let result = Executor::new(live(&state), Expander::new(), settings()).execute(&script);
    assert!(result.success, "{result:?}");
    assert_eq!(state.borrow().typed(), "out-top\nin-deep\nafter-top\nend-\n");
}

#[test]
fn global_timeout_stops_polling() {
    let state = vm(&[&["nothing here"]]);
    let script = Parser::new().parse("<watch \"never\" 10s>").unwrap();
    let settings = ExecutorSettings { timeout: Some(Duration::from_millis(30)), ..settings() };
    let result = Executor::new(live(&state), Expander::new(), settings).execute(&script);
    assert_eq!(result.exit_code, 124);
    assert!(result.error.unwrap().contains("timed out"));
}

#[test]
fn dry_run_touches_nothing_but_follows_includes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.vms", "<function f>\nfrom f\n<end-function>\n");
    let main = write(dir.path(), "main.vms", "<include \"lib.vms\">\n<call f>\n<wait 10m>\n");
    let src = fs::read_to_string(&main).unwrap();
    let script = Parser::new().parse(&src).unwrap();
    let mut exec = Executor::new(DryRunMode::new(), Expander::new(), settings()).with_script_path(&main);
    let result = exec.execute(&script);
    assert!(result.success, "{result:?}");
    // The undefined-at-parse-time call is only a warning.
    assert_eq!(result.issues.len(), 1);
    let narration = exec.mode().narration().join("\n");
    assert!(narration.contains("\"from f\""), "{narration}");
    assert!(narration.contains("wait 600s"), "{narration}");
}
