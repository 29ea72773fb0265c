use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hostscout::search::execute;
use hostscout::{classify, CheckSpec, EncodingMode, HostDocument, Target};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn create_capture(lines: usize) -> String {
    let mut capture = String::from(
        "# collector: unix-audit\n## uname -a\nLinux bench 6.1.0 #1 SMP x86_64 GNU/Linux\n\
         ## cat /etc/os-release\nID=debian\n## sshd -T\n",
    );
    for i in 0..lines {
        capture.push_str(&format!(
            "option{} value-{} # PermitRootLogin {} comment\n",
            i,
            i,
            if i % 50 == 0 { "yes" } else { "no" }
        ));
    }
    capture
}

fn check(pattern: &str, multiline: bool) -> CheckSpec {
    CheckSpec {
        id: "bench".to_string(),
        target: Target::Any,
        producer: None,
        distribution: None,
        pattern: pattern.to_string(),
        multiline,
        case_insensitive: false,
        captures: vec![],
        fields: BTreeMap::new(),
        description: None,
        source: PathBuf::from("bench.yaml"),
    }
}

fn bench_patterns(c: &mut Criterion) {
    let host = HostDocument::from_bytes(
        "bench.txt",
        create_capture(10_000).into_bytes(),
        EncodingMode::FailFast,
    );

    let checks = [
        ("literal", check("PermitRootLogin", false)),
        ("captures", check(r"PermitRootLogin (?P<value>\w+)", false)),
        ("anchored", check(r"^option\d+ (?P<value>\S+)", false)),
        ("multiline", check(r"(?P<first>^option1 .*$)\n^option2 ", true)),
    ];

    let mut group = c.benchmark_group("Search Unit");
    for (name, check) in &checks {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(execute(check, &host)));
        });
    }
    group.finish();
}

fn bench_document_scaling(c: &mut Criterion) {
    let check = check(r"PermitRootLogin (?P<value>yes)", false);

    let mut group = c.benchmark_group("Document Scaling");
    for &lines in &[100, 1_000, 10_000, 100_000] {
        let host = HostDocument::from_bytes(
            "bench.txt",
            create_capture(lines).into_bytes(),
            EncodingMode::FailFast,
        );
        group.bench_function(format!("lines_{}", lines), |b| {
            b.iter(|| black_box(execute(&check, &host)));
        });
    }
    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    let linux = create_capture(1_000);
    let cisco = "Building configuration...\n\nCurrent configuration : 4242 bytes\n\
                 version 15.2\nhostname core-sw1\n"
        .repeat(200);
    let unknown = "nothing to see here\n".repeat(1_000);

    let mut group = c.benchmark_group("Classification");
    group.bench_function("linux", |b| {
        b.iter(|| black_box(classify("web01.txt", &linux)));
    });
    group.bench_function("cisco", |b| {
        b.iter(|| black_box(classify("core-sw1.cfg", &cisco)));
    });
    group.bench_function("unknown", |b| {
        b.iter(|| black_box(classify("notes.txt", &unknown)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_patterns,
    bench_document_scaling,
    bench_classification
);
criterion_main!(benches);
