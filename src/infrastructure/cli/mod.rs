use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use crate::domain::{PublicDashboardQuery, TimeRangeDto, VariableQueryRequest, VariableValueMap};

#[derive(Parser)]
#[command(name = "pubdash-query")]
#[command(about = "Run public dashboard panel and variable queries")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the queries of one panel
    Query {
        #[command(flatten)]
        panel: PanelArgs,

        /// Bypass the query cache
        #[arg(long)]
        skip_cache: bool,
    },

    /// Print the metric request for a panel without executing it
    Request {
        #[command(flatten)]
        panel: PanelArgs,
    },

    /// Resolve the options of a template variable
    Variable {
        /// Public dashboard access token
        #[arg(short, long)]
        token: String,

        /// Variable name
        #[arg(short, long)]
        name: String,

        /// Values of other variables (key=value, repeat a key for multi-value)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Keep only options containing this text
        #[arg(short, long, default_value = "")]
        search: String,
    },

    /// Print the dashboard with query text removed
    View {
        /// Public dashboard access token
        #[arg(short, long)]
        token: String,
    },
}

#[derive(Args)]
pub struct PanelArgs {
    /// Public dashboard access token
    #[arg(short, long)]
    pub token: String,

    /// Panel id
    #[arg(short, long)]
    pub panel: String,

    /// Range start, e.g. now-1h (used only when time selection is enabled)
    #[arg(long, default_value = "")]
    pub from: String,

    /// Range end
    #[arg(long, default_value = "")]
    pub to: String,

    /// IANA timezone name
    #[arg(long, default_value = "")]
    pub timezone: String,

    #[arg(long, default_value_t = 0)]
    pub interval_ms: i64,

    #[arg(long, default_value_t = 0)]
    pub max_data_points: i64,

    /// Query caching TTL in milliseconds
    #[arg(long, default_value_t = 0)]
    pub caching_ttl: i64,

    /// Variable values (key=value, repeat a key for multi-value)
    #[arg(long = "var")]
    pub vars: Vec<String>,
}

impl PanelArgs {
    pub fn to_query(&self) -> PublicDashboardQuery {
        PublicDashboardQuery {
            interval_ms: self.interval_ms,
            max_data_points: self.max_data_points,
            query_caching_ttl: self.caching_ttl,
            time_range: TimeRangeDto {
                from: self.from.clone(),
                to: self.to.clone(),
                timezone: self.timezone.clone(),
            },
            variables: Some(parse_variables(&self.vars)),
        }
    }
}

pub fn variable_request(vars: &[String], search: &str) -> VariableQueryRequest {
    VariableQueryRequest {
        variables: Some(parse_variables(vars)),
        search_filter: search.to_string(),
    }
}

/// `key=value` pairs; a key given more than once becomes a multi-value
/// variable. Entries without `=` are ignored.
pub fn parse_variables(vars: &[String]) -> VariableValueMap {
    let mut map = VariableValueMap::new();
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            tracing::warn!("Ignoring variable without '=': {}", var);
            continue;
        };
        let key = key.trim().to_string();
        let value = Value::String(value.to_string());

        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_variables() {
        let vars = parse_variables(&strings(&[
            "server=localhost:9090",
            "env=prod",
            "env=staging",
            "env=dev",
            "query=a=b",
            "broken",
        ]));

        assert_eq!(vars["server"], json!("localhost:9090"));
        assert_eq!(vars["env"], json!(["prod", "staging", "dev"]));
        assert_eq!(vars["query"], json!("a=b"));
        assert!(!vars.contains_key("broken"));
    }

    #[test]
    fn test_panel_args_parse() {
        let cli = Cli::try_parse_from([
            "pubdash-query",
            "query",
            "--token",
            "abc123",
            "--panel",
            "2",
            "--from",
            "now-1h",
            "--to",
            "now",
            "--var",
            "server=a",
            "--skip-cache",
        ])
        .unwrap();

        let Commands::Query { panel, skip_cache } = cli.command else {
            panic!("expected query command");
        };
        assert!(skip_cache);

        let query = panel.to_query();
        assert_eq!(panel.panel, "2");
        assert_eq!(query.time_range.from, "now-1h");
        assert_eq!(query.variables.unwrap()["server"], json!("a"));
    }
}
