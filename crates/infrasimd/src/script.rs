//! Line-based command scripts.
//!
//! One step per line; blank lines and `#` comments are skipped. Arguments
//! may be quoted to keep spaces together.
//!
//! ```text
//! # warm the cache
//! cache SET session:1 "alice smith"
//! olap QUERY "SELECT count() FROM events"
//! @advance 1500
//! @advance 2s
//! @metrics
//! @reset
//! ```

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use infrasim_core::CommandResult;
use infrasim_core::units::parse_duration;
use infrasim_emulator::EmulationEngine;
use infrasim_metrics::ComponentSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command {
        component: String,
        command: String,
        args: Vec<String>,
    },
    Advance(Duration),
    Metrics,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based line number in the source.
    pub number: usize,
    pub step: Step,
}

/// What a step produced, printed as one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Command {
        line: usize,
        component: String,
        command: String,
        result: CommandResult,
    },
    Advance {
        line: usize,
        now_ms: u64,
    },
    Metrics {
        line: usize,
        components: Vec<ComponentSnapshot>,
    },
    Reset {
        line: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub commands: usize,
    pub failures: usize,
}

pub fn parse_script(source: &str) -> anyhow::Result<Vec<ScriptLine>> {
    let mut lines = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let number = idx + 1;
        let step = tokenize(line)
            .and_then(|tokens| parse_step(&tokens))
            .with_context(|| format!("line {number}: {line}"))?;
        lines.push(ScriptLine { number, step });
    }
    Ok(lines)
}

fn tokenize(line: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        bail!("unterminated quote");
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_step(tokens: &[String]) -> anyhow::Result<Step> {
    match tokens {
        [directive, rest @ ..] if directive.starts_with('@') => {
            match directive.to_ascii_lowercase().as_str() {
                "@advance" => {
                    let [amount] = rest else {
                        bail!("@advance takes exactly one duration");
                    };
                    Ok(Step::Advance(parse_advance(amount)?))
                }
                "@metrics" if rest.is_empty() => Ok(Step::Metrics),
                "@reset" if rest.is_empty() => Ok(Step::Reset),
                "@metrics" | "@reset" => bail!("{directive} takes no arguments"),
                other => bail!("unknown directive '{other}'"),
            }
        }
        [component, command, args @ ..] => Ok(Step::Command {
            component: component.clone(),
            command: command.clone(),
            args: args.to_vec(),
        }),
        _ => bail!("expected '<component> <COMMAND> [args...]'"),
    }
}

/// Bare numbers are milliseconds; anything else goes through the duration
/// parser ("2s", "1m").
fn parse_advance(amount: &str) -> anyhow::Result<Duration> {
    if amount.chars().all(|c| c.is_ascii_digit()) {
        let ms: u64 = amount.parse()?;
        return Ok(Duration::from_millis(ms));
    }
    parse_duration(amount).ok_or_else(|| anyhow!("invalid duration '{amount}'"))
}

/// Run every step in order, handing each output to `emit`. Failed commands
/// are counted, not fatal.
pub fn run_script(
    engine: &mut EmulationEngine,
    lines: &[ScriptLine],
    mut emit: impl FnMut(&Output) -> anyhow::Result<()>,
) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();
    for line in lines {
        let output = match &line.step {
            Step::Command {
                component,
                command,
                args,
            } => {
                let result = engine.execute(component, command, args);
                summary.commands += 1;
                if !result.success {
                    summary.failures += 1;
                }
                Output::Command {
                    line: line.number,
                    component: component.clone(),
                    command: command.clone(),
                    result,
                }
            }
            Step::Advance(by) => {
                engine.advance(*by);
                Output::Advance {
                    line: line.number,
                    now_ms: engine.clock().now_ms(),
                }
            }
            Step::Metrics => Output::Metrics {
                line: line.number,
                components: engine.aggregate_metrics(),
            },
            Step::Reset => {
                engine.reset_all_stats();
                Output::Reset { line: line.number }
            }
        };
        emit(&output)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrasim_core::{Topology, TopologyNode};

    fn cache_engine() -> EmulationEngine {
        let mut engine = EmulationEngine::new();
        engine
            .upsert_topology(Topology::new(
                vec![TopologyNode {
                    id: "cache".into(),
                    kind: "redis".into(),
                    label: None,
                    config: serde_json::Value::Null,
                }],
                Vec::new(),
            ))
            .unwrap();
        engine
    }

    // ── Parsing ──────────────────────────────────────────────────────

    #[test]
    fn parses_commands_and_directives() {
        let script = "\
# setup
cache SET greeting \"hello world\"

@advance 1500
@advance 2s
@metrics
@reset
";
        let lines = parse_script(script).unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].number, 2);
        assert_eq!(
            lines[0].step,
            Step::Command {
                component: "cache".into(),
                command: "SET".into(),
                args: vec!["greeting".into(), "hello world".into()],
            }
        );
        assert_eq!(lines[1].step, Step::Advance(Duration::from_millis(1500)));
        assert_eq!(lines[2].step, Step::Advance(Duration::from_secs(2)));
        assert_eq!(lines[3].step, Step::Metrics);
        assert_eq!(lines[4].step, Step::Reset);
    }

    #[test]
    fn single_quotes_and_empty_args() {
        let tokens = tokenize("olap QUERY 'SELECT 1' \"\"").unwrap();
        assert_eq!(tokens, vec!["olap", "QUERY", "SELECT 1", ""]);
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = parse_script("cache SET \"open").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
        assert!(parse_script("cache").is_err());
        assert!(parse_script("@advance").is_err());
        assert!(parse_script("@advance soon").is_err());
        assert!(parse_script("@metrics now").is_err());
        assert!(parse_script("@teleport 5").is_err());
    }

    // ── Running ──────────────────────────────────────────────────────

    #[test]
    fn runs_against_the_emulator() {
        let mut engine = cache_engine();
        let lines =
            parse_script("cache SET k v EX 1\ncache GET k\n@advance 1500\ncache GET k\nghost PING\n@metrics")
                .unwrap();

        let mut outputs = Vec::new();
        let summary = run_script(&mut engine, &lines, |out| {
            outputs.push(serde_json::to_value(out)?);
            Ok(())
        })
        .unwrap();

        assert_eq!(summary, Summary { commands: 4, failures: 1 });
        assert_eq!(outputs[1]["result"]["value"], "v");
        assert_eq!(outputs[2]["type"], "advance");
        assert_eq!(outputs[2]["now_ms"], 1500);
        assert!(outputs[3]["result"].get("value").is_none_or(|v| v.is_null()));
        assert_eq!(outputs[4]["result"]["success"], false);
        assert_eq!(outputs[5]["components"][0]["component_id"], "cache");
    }

    #[test]
    fn emit_errors_stop_the_run() {
        let mut engine = cache_engine();
        let lines = parse_script("cache PING\ncache PING").unwrap();
        let mut seen = 0;
        let result = run_script(&mut engine, &lines, |_| {
            seen += 1;
            bail!("stdout closed")
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
