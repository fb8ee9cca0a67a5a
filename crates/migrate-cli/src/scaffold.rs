use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use migrate_common::Version;
use migrate_config::VersionScheme;
use migrate_db::discover;
use regex::Regex;
use tracing::info;

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"))
}

/// `"Add area_id to Orders!"` -> `"add_area_id_to_orders"`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    separator_re()
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

pub fn next_version(
    scheme: VersionScheme,
    latest: Option<Version>,
    now: DateTime<Utc>,
) -> Result<Version> {
    let next_after = |v: Version| {
        v.get()
            .checked_add(1)
            .map(Version::new)
            .context("migration version overflow")
    };
    match scheme {
        VersionScheme::Sequential => match latest {
            Some(v) => next_after(v),
            None => Ok(Version::new(1)),
        },
        VersionScheme::Timestamp => {
            let stamp: Version = now
                .format("%Y%m%d%H%M%S")
                .to_string()
                .parse()
                .map_err(anyhow::Error::msg)?;
            match latest {
                Some(v) if v >= stamp => next_after(v),
                _ => Ok(stamp),
            }
        }
    }
}

pub fn file_name(scheme: VersionScheme, version: Version, slug: &str) -> String {
    match scheme {
        VersionScheme::Sequential => format!("{:04}_{slug}.sql", version.get()),
        VersionScheme::Timestamp => format!("{version}_{slug}.sql"),
    }
}

/// Write an empty migration after the highest version in `dir`.
pub fn create(
    dir: &Path,
    scheme: VersionScheme,
    name: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let slug = slugify(name);
    if slug.is_empty() {
        bail!("migration name {name:?} has no usable characters");
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let latest = discover(dir)?.last().map(|f| f.version);
    let version = next_version(scheme, latest, now)?;
    let path = dir.join(file_name(scheme, version, &slug));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write!(
        file,
        "-- {name}\n-- created {}\n--\n-- Statements run in order inside one transaction. End each with ';'.\n\n",
        now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )?;

    info!("created migration {version} at {}", path.display());
    Ok(path)
}
