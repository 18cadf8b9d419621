use chrono::{Local, NaiveDate};
use log::{debug, error, info, warn};
use occupancy_cache::client::OccupEyeClient;
use occupancy_cache::config::Config;
use occupancy_cache::services::query::QueryEngine;
use occupancy_cache::services::refresh::CacheBuilder;
use occupancy_cache::store::redis_store::RedisStore;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Default)]
struct CliOptions {
    env_file: Option<PathBuf>,
    once: bool,
}

/// One refresh cycle: upstream snapshot into the store, then history when the day rolled over.
fn run_cycle(
    cfg: &Config,
    builder: &mut CacheBuilder<RedisStore>,
    client: &OccupEyeClient,
    reader: &mut QueryEngine<RedisStore>,
    history_day: &mut Option<NaiveDate>,
) -> Result<(), String> {
    let report = builder.refresh(client).map_err(|e| format!("refresh failed: {}", e))?;
    let readable = reader
        .list_surveys("all")
        .map_err(|e| format!("reading back the cache failed: {}", e))?
        .len();
    if readable != report.surveys {
        warn!("Wrote {} survey(s) but {} are readable", report.surveys, readable);
    }

    let today = Local::now().date_naive();
    if cfg.history_enabled && *history_day != Some(today) {
        let written = builder
            .cache_time_averages(client, today)
            .map_err(|e| format!("historical averages failed: {}", e))?;
        info!("Historical averages refreshed ({} bucket map(s))", written);
        *history_day = Some(today);
    } else {
        debug!("Historical averages are current for {}", today);
    }
    Ok(())
}

pub fn run(once: bool) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (refresh_interval={}s, request_timeout={}s, store_timeout={}s, max_request_retries={}, prefix={}, versioned={}, key_ttl={}, staff_surveys={}, locations={}, history={} {:?})",
        cfg.refresh_interval.as_secs(),
        cfg.request_timeout.as_secs(),
        cfg.store_timeout.as_secs(),
        cfg.max_request_retries.get(),
        cfg.key_prefix,
        cfg.versioned_keys,
        cfg.key_ttl_secs
            .map(|v| format!("{}s", v))
            .unwrap_or_else(|| "-".to_string()),
        cfg.staff_survey_ids.len(),
        cfg.survey_locations_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.history_enabled,
        cfg.history_windows
    );

    // 2) Store handles: one for the builder, one for read-back
    let store = RedisStore::open(&cfg.redis_url, cfg.store_timeout).map_err(|e| format!("Store setup failed: {}", e))?;
    let mut reader = QueryEngine::new(store.reader(), cfg.key_schema(), cfg.history_windows.clone());
    let mut builder = CacheBuilder::new(store, cfg.key_schema(), cfg.refresh_settings());

    // 3) Upstream client; authenticate once up front so bad credentials fail fast
    let client = OccupEyeClient::new(cfg.client_settings());
    client
        .auth()
        .refresh()
        .map_err(|e| format!("OccupEye auth failed (credentials invalid?): {}", e))?;
    info!("Authenticated to OccupEye API");

    let mut history_day: Option<NaiveDate> = None;

    if once {
        return run_cycle(&cfg, &mut builder, &client, &mut reader, &mut history_day);
    }

    // 4) Refresh loop (steady cadence); a failed cycle leaves the previous cache in place
    info!("Starting refresh loop: interval={}s", cfg.refresh_interval.as_secs());
    loop {
        let tick_start = Instant::now();

        if let Err(e) = run_cycle(&cfg, &mut builder, &client, &mut reader, &mut history_day) {
            error!("{}; retrying next cycle", e);
        }

        let elapsed = tick_start.elapsed();
        if elapsed < cfg.refresh_interval {
            thread::sleep(cfg.refresh_interval - elapsed);
        }
    }
}

fn parse_cli() -> Result<CliOptions, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut opts = CliOptions::default();

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--once") => opts.once = true,
            Some("--env-file") => {
                if opts.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                opts.env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if opts.env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                opts.env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }
    Ok(opts)
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already present in the process environment win over the file.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// `KEY=value`, `export KEY=value`, quoted values and trailing `#` comments. Blank and comment
/// lines yield `None`.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw_value = raw_value.trim();
    let value = match raw_value.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&raw_value[1..], q)?,
        _ => raw_value.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Body of a quoted value up to the closing `quote`. Escapes apply inside double quotes only.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
                result.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                }
                return Err("unexpected characters after closing quote".to_string());
            }
            other => result.push(other),
        }
    }
    Err("unterminated quoted value".to_string())
}

fn main() {
    let (opts, loaded_env) = match parse_cli().and_then(|opts| {
        let loaded = configure_env(opts.env_file.clone())?;
        Ok((opts, loaded))
    }) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "occupancy-cache {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(opts.once) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_assignments() {
        assert_eq!(parse_env_assignment("# comment"), Ok(None));
        assert_eq!(parse_env_assignment("   "), Ok(None));
        assert_eq!(
            parse_env_assignment("export REDIS_URL=redis://cache:6379/ # local"),
            Ok(Some(("REDIS_URL".to_string(), "redis://cache:6379/".to_string())))
        );
        assert_eq!(
            parse_env_assignment(r#"OCCUPEYE_PASSWORD="p#ss\"word""#),
            Ok(Some(("OCCUPEYE_PASSWORD".to_string(), "p#ss\"word".to_string())))
        );
        assert_eq!(
            parse_env_assignment(r"STAFF_SURVEY_IDS='1,2\n'"),
            Ok(Some(("STAFF_SURVEY_IDS".to_string(), r"1,2\n".to_string())))
        );
        assert_eq!(
            parse_env_assignment("HISTORY_WINDOWS="),
            Ok(Some(("HISTORY_WINDOWS".to_string(), String::new())))
        );
    }

    #[test]
    fn env_assignment_errors() {
        assert!(parse_env_assignment("NO_EQUALS").is_err());
        assert!(parse_env_assignment("=value").is_err());
        assert!(parse_env_assignment("BAD KEY=1").is_err());
        assert!(parse_env_assignment("OPEN=\"never closed").is_err());
        assert!(parse_env_assignment("TRAILING='x' y").is_err());
    }
}
