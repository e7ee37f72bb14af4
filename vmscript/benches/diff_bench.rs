use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vmscript::pattern::CaseMatcher;
use vmscript::screen::diff;

fn console(rows: usize, start: usize) -> Vec<String> {
    (start..start + rows)
        .map(|i| format!("[{i:>6}] kernel: eth0: link up, 1000Mbps, full-duplex"))
        .collect()
}

fn bench_diff(c: &mut Criterion) {
    let prev = console(25, 0);
    let same = prev.clone();
    let scrolled = console(25, 3);
    let unrelated: Vec<String> = (0..25).map(|i| format!("row {i} of a cleared screen")).collect();

    let mut g = c.benchmark_group("screen_diff");

    g.bench_function("first_capture", |b| b.iter(|| diff(None, black_box(&prev))));
    g.bench_function("unchanged", |b| {
        b.iter(|| diff(Some(black_box(prev.as_slice())), black_box(&same)))
    });
    g.bench_function("scrolled_3", |b| {
        b.iter(|| diff(Some(black_box(prev.as_slice())), black_box(&scrolled)))
    });
    g.bench_function("no_overlap", |b| {
        b.iter(|| diff(Some(black_box(prev.as_slice())), black_box(&unrelated)))
    });

    g.finish();
}

fn bench_cases(c: &mut Criterion) {
    let mut screen = console(24, 0);
    screen.push("Ubuntu 24.04 LTS host tty1".to_owned());
    let matcher = CaseMatcher::new(&["Debian", "Ubuntu", "Fedora", "login:", "Password:"]);

    let mut g = c.benchmark_group("case_select");
    g.bench_function("five_patterns_25_rows", |b| {
        b.iter(|| matcher.select(black_box(&screen)))
    });
    g.finish();
}

criterion_group!(benches, bench_diff, bench_cases);
criterion_main!(benches);
