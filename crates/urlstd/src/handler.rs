//! Maps sub-commands onto store operations and renders the result

use std::fmt::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use urlstoredb::{UrlEntry, UrlStore};

use crate::Command;

/// Entry as printed by the tool
#[derive(Debug, Serialize)]
struct EntryView<'a> {
    code: &'a str,
    url: &'a str,
    created_at: String,
    access_count: u64,
}

impl<'a> From<&'a UrlEntry> for EntryView<'a> {
    fn from(entry: &'a UrlEntry) -> Self {
        Self {
            code: &entry.short_code,
            url: &entry.long_url,
            created_at: entry.created_at.to_rfc3339(),
            access_count: entry.access_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsView {
    entries: usize,
    shortened: u64,
    hits: u64,
    misses: u64,
    hit_ratio: f64,
    removals: u64,
    collisions: u64,
    saves: u64,
    failed_saves: u64,
    dirty: bool,
    table_capacity: usize,
    rehashes: u64,
}

/// Prepend `https://` unless the URL already has an http(s) scheme
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

pub struct CommandHandler {
    store: Arc<UrlStore>,
    json: bool,
}

impl CommandHandler {
    pub fn new(store: Arc<UrlStore>, json: bool) -> Self {
        Self { store, json }
    }

    pub fn handle(&self, command: Command) -> Result<String> {
        match command {
            Command::Shorten { url, code } => self.handle_shorten(&url, code),
            Command::Resolve { code } => self.handle_resolve(&code),
            Command::List { from, to } => self.handle_list(from.as_deref(), to.as_deref()),
            Command::Popular { limit } => self.handle_popular(limit),
            Command::Remove { code } => self.handle_remove(&code),
            Command::Stats => self.handle_stats(),
            Command::Verify => self.handle_verify(),
        }
    }

    fn handle_shorten(&self, url: &str, code: Option<String>) -> Result<String> {
        let url = normalize_url(url);
        let entry = match code {
            Some(code) => {
                // A fixed code would only collide again on every retry
                match self.store.peek(&code) {
                    Ok(_) => bail!("code {} is already taken", code),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.store.shorten(&url, &mut |_: &str, _: u32| code.clone())?
            }
            None => self.store.shorten_url(&url).context("shorten failed")?,
        };

        if self.json {
            Ok(serde_json::to_string_pretty(&EntryView::from(&entry))?)
        } else {
            Ok(entry.short_code)
        }
    }

    fn handle_resolve(&self, code: &str) -> Result<String> {
        let entry = self.store.resolve(code)?;
        if self.json {
            Ok(serde_json::to_string_pretty(&EntryView::from(&entry))?)
        } else {
            Ok(entry.long_url)
        }
    }

    fn handle_list(&self, from: Option<&str>, to: Option<&str>) -> Result<String> {
        use std::ops::Bound;

        let low = from.map_or(Bound::Unbounded, Bound::Included);
        let high = to.map_or(Bound::Unbounded, Bound::Included);
        let entries = self.store.list_bounded(low, high)?;
        self.render_entries(&entries)
    }

    fn handle_popular(&self, limit: usize) -> Result<String> {
        let entries = self.store.popular(limit)?;
        self.render_entries(&entries)
    }

    fn handle_remove(&self, code: &str) -> Result<String> {
        let entry = self.store.remove(code)?;
        if self.json {
            Ok(serde_json::to_string_pretty(&EntryView::from(&entry))?)
        } else {
            Ok(format!("removed {}", entry.short_code))
        }
    }

    fn handle_stats(&self) -> Result<String> {
        let stats = self.store.stats();
        let (table_capacity, rehashes) = self.store.table_shape();
        let view = StatsView {
            entries: self.store.len(),
            shortened: stats.shortened(),
            hits: stats.hits(),
            misses: stats.misses(),
            hit_ratio: stats.hit_ratio(),
            removals: stats.removals(),
            collisions: stats.collisions(),
            saves: stats.saves(),
            failed_saves: stats.failed_saves(),
            dirty: self.store.is_dirty(),
            table_capacity,
            rehashes,
        };

        if self.json {
            return Ok(serde_json::to_string_pretty(&view)?);
        }

        let mut out = String::new();
        writeln!(out, "entries:        {}", view.entries)?;
        writeln!(out, "shortened:      {}", view.shortened)?;
        writeln!(out, "hits:           {}", view.hits)?;
        writeln!(out, "misses:         {}", view.misses)?;
        writeln!(out, "hit_ratio:      {:.2}%", view.hit_ratio * 100.0)?;
        writeln!(out, "removals:       {}", view.removals)?;
        writeln!(out, "collisions:     {}", view.collisions)?;
        writeln!(out, "saves:          {}", view.saves)?;
        writeln!(out, "failed_saves:   {}", view.failed_saves)?;
        writeln!(out, "dirty:          {}", view.dirty)?;
        write!(
            out,
            "table_capacity: {} x 2 ({} rehashes)",
            view.table_capacity, view.rehashes
        )?;
        Ok(out)
    }

    fn handle_verify(&self) -> Result<String> {
        self.store
            .check_consistency()
            .context("index consistency check failed")?;
        if self.json {
            Ok(serde_json::json!({ "consistent": true, "entries": self.store.len() }).to_string())
        } else {
            Ok(format!("OK ({} entries)", self.store.len()))
        }
    }

    fn render_entries(&self, entries: &[UrlEntry]) -> Result<String> {
        if self.json {
            let views: Vec<EntryView> = entries.iter().map(EntryView::from).collect();
            return Ok(serde_json::to_string_pretty(&views)?);
        }

        let mut out = String::new();
        for entry in entries {
            writeln!(
                out,
                "{}\t{}\t{}",
                entry.short_code, entry.access_count, entry.long_url
            )?;
        }
        Ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use urlstoredb::StoreConfig;

    fn handler(dir: &TempDir, json: bool) -> CommandHandler {
        let store = UrlStore::open(
            StoreConfig::new(dir.path())
                .with_top_k(3)
                .with_save_retry(0, Duration::ZERO),
        )
        .unwrap();
        CommandHandler::new(Arc::new(store), json)
    }

    fn shorten(handler: &CommandHandler, url: &str, code: &str) -> String {
        handler
            .handle(Command::Shorten {
                url: url.to_string(),
                code: Some(code.to_string()),
            })
            .unwrap()
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com/a"), "https://example.com/a");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("HTTPS://example.com"), "HTTPS://example.com");
        assert_eq!(normalize_url("  example.com "), "https://example.com");
    }

    #[test]
    fn test_shorten_and_resolve() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);

        let code = handler
            .handle(Command::Shorten {
                url: "example.com/page".to_string(),
                code: None,
            })
            .unwrap();
        assert_eq!(code.len(), 7);

        let url = handler.handle(Command::Resolve { code }).unwrap();
        assert_eq!(url, "https://example.com/page");
    }

    #[test]
    fn test_custom_code_taken() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        assert_eq!(shorten(&handler, "example.com/a", "ab12"), "ab12");

        let err = handler
            .handle(Command::Shorten {
                url: "example.com/b".to_string(),
                code: Some("ab12".to_string()),
            })
            .unwrap_err();
        assert!(err.to_string().contains("already taken"));
        assert_eq!(handler.store.stats().collisions(), 0);
        assert_eq!(handler.store.peek("ab12").unwrap().long_url, "https://example.com/a");
    }

    #[test]
    fn test_resolve_unknown_code() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);

        let err = handler
            .handle(Command::Resolve {
                code: "nope".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_list_and_popular() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        shorten(&handler, "example.com/b", "cd34");
        shorten(&handler, "example.com/a", "ab12");
        shorten(&handler, "example.com/c", "ef56");
        for _ in 0..3 {
            handler.handle(Command::Resolve { code: "ab12".into() }).unwrap();
        }

        let listed = handler
            .handle(Command::List {
                from: Some("ab12".into()),
                to: Some("cd34".into()),
            })
            .unwrap();
        assert_eq!(
            listed,
            "ab12\t3\thttps://example.com/a\ncd34\t0\thttps://example.com/b"
        );

        let popular = handler.handle(Command::Popular { limit: 10 }).unwrap();
        assert_eq!(popular, "ab12\t3\thttps://example.com/a");
    }

    #[test]
    fn test_json_output() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, true);
        shorten(&handler, "example.com/a", "ab12");
        handler.handle(Command::Resolve { code: "ab12".into() }).unwrap();

        let out = handler.handle(Command::Popular { limit: 1 }).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["code"], "ab12");
        assert_eq!(parsed[0]["url"], "https://example.com/a");
        assert_eq!(parsed[0]["access_count"], 1);

        let stats: serde_json::Value =
            serde_json::from_str(&handler.handle(Command::Stats).unwrap()).unwrap();
        assert_eq!(stats["entries"], 1);
        assert_eq!(stats["hits"], 1);
    }

    #[test]
    fn test_remove_and_verify() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, false);
        shorten(&handler, "example.com/a", "ab12");

        let out = handler.handle(Command::Remove { code: "ab12".into() }).unwrap();
        assert_eq!(out, "removed ab12");
        assert!(handler.handle(Command::Remove { code: "ab12".into() }).is_err());

        let out = handler.handle(Command::Verify).unwrap();
        assert_eq!(out, "OK (0 entries)");
    }
}
