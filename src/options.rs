use std::path::PathBuf;

use getopts::Options;

pub const DEFAULT_DB_FILE: &str = "stress-dashboard.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq)]
pub struct StartupOptions {
    /// Overrides the configured device port when given.
    pub port: Option<String>,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub simulate: bool,
    pub fake_fallback: bool,
}

pub enum Parsed {
    Run(StartupOptions),
    Help(String),
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("", "db", "SQLite database file", "PATH");
    opts.optopt(
        "",
        "data-dir",
        "Directory for settings.json and the default database (default '.')",
        "DIR",
    );
    opts.optflag("", "simulate", "Use the simulated device instead of a serial port");
    opts.optflag(
        "",
        "fake-fallback",
        "Fall back to the simulated device when the port cannot be opened",
    );
    opts.optflag("h", "help", "Print this help");
    opts
}

/// `args` excludes the program name.
pub fn parse_args(program: &str, args: &[String]) -> Result<Parsed, String> {
    let opts = options();
    let usage = format!("Usage: {program} [options] [port]");

    let matches = opts
        .parse(args)
        .map_err(|f| format!("{f}\n{}", opts.usage(&usage)))?;

    if matches.opt_present("h") {
        return Ok(Parsed::Help(opts.usage(&usage)));
    }

    if matches.free.len() > 1 {
        return Err(format!(
            "Expected at most one port, got {:?}\n{}",
            matches.free,
            opts.usage(&usage)
        ));
    }

    let data_dir = PathBuf::from(matches.opt_str("data-dir").unwrap_or_else(|| ".".into()));
    let db_path = matches
        .opt_str("db")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE));
    let port = matches
        .free
        .first()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    Ok(Parsed::Run(StartupOptions {
        port,
        data_dir,
        db_path,
        simulate: matches.opt_present("simulate"),
        fake_fallback: matches.opt_present("fake-fallback"),
    }))
}
