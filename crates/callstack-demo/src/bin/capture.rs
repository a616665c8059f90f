use callstack::FormatSpec;
use callstack_demo::{SCHEMA_VERSION, TraceBundle, TraceRecord, collect_here, countdown, windowed};
use std::fs;
use std::path::PathBuf;

const USAGE: &str = "usage: capture [--out <trace_bundle.json>]";
const SPECS: &[&str] = &["%v", "%+v", "%#v", "%n", "%+n", "%d"];

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let out_path = parse_out_path()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let specs = SPECS
        .iter()
        .map(|spec| {
            FormatSpec::parse(spec).ok_or_else(|| format!("invalid format spec {spec:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let traces = vec![
        countdown("countdown", 3),
        windowed(2),
        collect_here("leaf_direct"),
    ];

    if let Some(trace) = traces.iter().find(|trace| trace.stack.is_empty()) {
        return Err(format!(
            "invariant violated: trace {:?} captured zero frames",
            trace.label
        ));
    }

    let dispatch = callstack::default_capturer().fault_dispatch();
    tracing::info!(
        fault_dispatch = dispatch.map(|d| d.name()),
        "captured {} traces",
        traces.len()
    );

    for trace in &traces {
        let trimmed = trace.stack.trim_runtime();
        println!(
            "{} ({} frames, {} after trim):",
            trace.label,
            trace.stack.len(),
            trimmed.len()
        );
        for spec in &specs {
            println!("  {:<4} {}", spec.to_string(), spec.render_stack(&trimmed));
        }
    }

    let Some(out_path) = out_path else {
        return Ok(());
    };

    let capture_binary = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current executable path: {e}"))?
        .to_string_lossy()
        .into_owned();

    let bundle = TraceBundle {
        schema_version: SCHEMA_VERSION,
        capture_binary,
        traces: traces
            .iter()
            .map(|trace| trace.to_record(&specs))
            .collect::<Vec<TraceRecord>>(),
    };

    let encoded = serde_json::to_string_pretty(&bundle)
        .map_err(|e| format!("failed to encode trace bundle as JSON: {e}"))?;
    fs::write(&out_path, encoded).map_err(|e| {
        format!(
            "failed to write trace bundle to {}: {e}",
            out_path.display()
        )
    })?;

    tracing::info!(
        "wrote {} traces into {}",
        bundle.traces.len(),
        out_path.display()
    );

    Ok(())
}

fn parse_out_path() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    let Some(flag) = args.next() else {
        return Ok(None);
    };

    if flag != "--out" {
        return Err(format!("expected --out, got {flag:?}; {USAGE}"));
    }

    let out = args
        .next()
        .ok_or_else(|| format!("missing output path; {USAGE}"))?;

    if args.next().is_some() {
        return Err(format!("unexpected trailing arguments; {USAGE}"));
    }

    Ok(Some(PathBuf::from(out)))
}
