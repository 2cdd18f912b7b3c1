use advisory_oracle::PermissivenessLevel;
use std::path::Path;

/// Parse the `MODE: <n>` line of a permissiveness file.
pub fn parse_level(contents: &str) -> Option<PermissivenessLevel> {
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("mode") {
            return None;
        }
        value.trim().parse::<i64>().ok().map(PermissivenessLevel::new)
    })
}

/// Current gatekeeper level, re-read every cycle so an operator can change it
/// without a restart. Falls back to `default` when the file is missing or has no
/// usable MODE line.
pub async fn read_level(path: &Path, default: PermissivenessLevel) -> PermissivenessLevel {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_level(&contents).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "No valid MODE line, using level {}", default.value());
            default
        }),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Permissiveness file unreadable");
            default
        }
    }
}
