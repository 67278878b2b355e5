//! Explains why a user's service may be missing
use std::fmt::Write as _;

use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::{DescriptorState, DoctorReport, Lifecycle};

/// Check the registry and descriptor for common problems. Changes nothing
#[derive(Parser, Debug)]
pub struct Doctor {
    pub username: Option<String>,
}

fn render(report: &DoctorReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "registry: {} ({})",
        report.registry.display(),
        if report.registry_exists { "present" } else { "missing" }
    );
    if report.crlf_lines > 0 {
        let _ = writeln!(out, "  {} lines end in CRLF", report.crlf_lines);
    }
    for row in &report.rows {
        match row {
            Ok(record) => {
                let _ = writeln!(out, "  ok       {}", record.username);
            }
            Err(err) => {
                let _ = writeln!(out, "  invalid  {}", err);
            }
        }
    }

    let state = match report.descriptor_state {
        DescriptorState::Missing => "missing",
        DescriptorState::Stale => "stale",
        DescriptorState::Current => "current",
    };
    let _ = writeln!(out, "descriptor: {} ({})", report.descriptor.display(), state);
    let _ = writeln!(out, "compiled services: {}", report.compiled_services.join(" "));
    match &report.runtime_services {
        Some(Ok(services)) => {
            let _ = writeln!(out, "runtime services: {}", services.join(" "));
        }
        Some(Err(err)) => {
            let _ = writeln!(out, "runtime services: unavailable ({})", err);
        }
        None => {}
    }

    if let Some(target) = &report.target {
        let _ = writeln!(
            out,
            "{}: {} registry rows, {} in descriptor",
            target.username,
            target.registry_rows,
            if target.in_descriptor { "service" } else { "no service" }
        );
        for err in &target.invalid_rows {
            let _ = writeln!(out, "  invalid  {}", err);
        }
    }

    if report.is_healthy() {
        let _ = writeln!(out, "no problems found");
    } else {
        for hint in &report.hints {
            let _ = writeln!(out, "hint: {}", hint);
        }
    }
    out
}

pub fn doctor(args: Doctor, lifecycle: &Lifecycle) -> Result<()> {
    let report = lifecycle.doctor(args.username.as_deref())?;
    print!("{}", render(&report));
    Ok(())
}
