//! Tracing subscriber setup.
//!
//! Each component gets a default level; `LOG_LEVEL` (or `--log-level`)
//! adds comma-separated `EnvFilter` directives on top, e.g.
//! `LOG_LEVEL=transit_live::worker=debug,warn`.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

pub const COMPONENT_LEVELS: &[(&str, Level)] = &[
    ("transit_live", Level::INFO),
    ("transit_core", Level::INFO),
    ("tokio_tungstenite", Level::WARN),
    ("tungstenite", Level::WARN),
];

/// Build the filter from component defaults plus `directives`.
///
/// Directives that fail to parse are reported on stderr and skipped.
pub fn build_filter<'a>(
    levels: impl IntoIterator<Item = &'a (&'a str, Level)>,
    directives: Option<&str>,
) -> EnvFilter {
    let defaults = levels
        .into_iter()
        .map(|(target, level)| {
            if target.is_empty() {
                level.to_string()
            } else {
                format!("{target}={level}")
            }
        })
        .collect::<Vec<_>>()
        .join(",");

    let mut filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .parse_lossy(defaults);

    let extra = directives
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Directive>() {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("Failed to parse log level directive {s:?}: {e}");
                None
            }
        });

    for directive in extra {
        filter = filter.add_directive(directive);
    }
    filter
}

/// Install the global subscriber, writing to stderr so command output on
/// stdout stays machine-readable.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(directives: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(COMPONENT_LEVELS, directives))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let filter = build_filter(COMPONENT_LEVELS, None).to_string();
        assert!(filter.contains("transit_live=info"));
        assert!(filter.contains("tungstenite=warn"));
    }

    #[test]
    fn test_directives_override() {
        let filter = build_filter(COMPONENT_LEVELS, Some("transit_live::worker=debug, ,")).to_string();
        assert!(filter.contains("transit_live::worker=debug"));
    }

    #[test]
    fn test_bad_directive_is_skipped() {
        let filter = build_filter(COMPONENT_LEVELS, Some("transit_live=loud,transit_core=trace")).to_string();
        assert!(filter.contains("transit_core=trace"));
        assert!(!filter.contains("loud"));
    }
}
