use mcprobe_core::{VerificationResult, VerificationStatus};

const SAMPLE_TOOLS: usize = 5;

pub(crate) fn fmt_k(n: usize) -> String {
    if n >= 1000 {
        format!("{:.1}k", n as f32 / 1000.0)
    } else {
        format!("{}", n)
    }
}

fn badge(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Success => "[ok]     ",
        VerificationStatus::Failure => "[fail]   ",
        VerificationStatus::Timeout => "[timeout]",
    }
}

/// Human summary for one server: a headline plus indented detail lines.
pub(crate) fn summary(result: &VerificationResult) -> String {
    let mut out = format!("{} {}", badge(result.status()), result.server());

    if let Some(ms) = result.connection_time_ms() {
        out.push_str(&format!("  {}ms", ms));
    }
    if let Some(caps) = result.capabilities() {
        let n = caps.tools.len();
        out.push_str(&format!(
            "  {} tool{}  ~{} tokens",
            n,
            if n == 1 { "" } else { "s" },
            fmt_k(caps.total_tool_tokens)
        ));
        if let Some(info) = &caps.server_info {
            out.push_str(&format!("\n    server: {}", info.name));
            if let Some(version) = &info.version {
                out.push_str(&format!(" {}", version));
            }
        }
        if n > 0 {
            let names: Vec<&str> = caps.tool_names().take(SAMPLE_TOOLS).collect();
            out.push_str(&format!("\n    tools: {}", names.join(", ")));
            if n > SAMPLE_TOOLS {
                out.push_str(&format!(" (+{} more)", n - SAMPLE_TOOLS));
            }
        }
    }
    if let Some(err) = result.error() {
        for line in err.lines() {
            out.push_str(&format!("\n    {}", line));
        }
    }
    out
}

/// Summary line for a server whose verification could not run at all.
pub(crate) fn error_summary(server: &str, err: &dyn std::fmt::Display) -> String {
    format!("[error]   {}\n    {}", server, err)
}

pub(crate) fn totals(ok: usize, total: usize, tokens: usize) -> String {
    format!(
        "{}/{} servers verified, ~{} tool tokens in total",
        ok,
        total,
        fmt_k(tokens)
    )
}
