use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use colored::{ColoredString, Colorize};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::artifact::SharedCache;
use crate::bundler::{BuildResult, Plugin};
use crate::error::Result;

const KB: f64 = 1024.0;

/// One row of the build summary
#[derive(Debug, Clone, PartialEq)]
pub struct SizeRow {
    pub path: String,
    pub size_kb: f64,
    pub gzip_kb: f64,
}

/// Prints build progress and the artifact size table
pub struct Reporter {
    cache: SharedCache,
    root: PathBuf,
    out_dir: PathBuf,
    first_build: AtomicBool,
    started: Mutex<Option<Instant>>,
}

impl Reporter {
    pub fn new(cache: SharedCache, root: &Path, out_dir: &Path) -> Self {
        Self {
            cache,
            root: root.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            first_build: AtomicBool::new(true),
            started: Mutex::new(None),
        }
    }

    fn display_path(&self, logical_name: &str) -> String {
        let full = self.out_dir.join(logical_name);
        full.strip_prefix(&self.root)
            .unwrap_or(&full)
            .display()
            .to_string()
    }

    fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }
}

pub fn gzip_size(bytes: &[u8]) -> usize {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(bytes).is_err() {
        return 0;
    }
    encoder.finish().map(|v| v.len()).unwrap_or(0)
}

/// `ms` below one second, seconds with two decimals above
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * 1000.0;
    if ms > 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{}ms", ms.round() as u64)
    }
}

fn size_color(size_kb: f64, text: &str) -> ColoredString {
    if size_kb > 500.0 {
        text.magenta()
    } else if size_kb > 100.0 {
        text.yellow()
    } else {
        text.cyan()
    }
}

/// Render the artifact table and totals line
pub fn format_summary(rows: &[SizeRow]) -> String {
    let width = rows.iter().map(|r| r.path.len()).max().unwrap_or(0).max(10);
    let mut lines = Vec::with_capacity(rows.len() + 1);

    for row in rows {
        let padding = " ".repeat(width - row.path.len() + 2);
        let size = format!("{:>9}", format!("{:.2} kB", row.size_kb));
        let gzip = format!("│ gzip: {:>5.2} kB", row.gzip_kb);
        lines.push(format!(
            "{} {}{}{} {}",
            "i".blue(),
            row.path.dimmed(),
            padding,
            size_color(row.size_kb, &size),
            gzip.dimmed()
        ));
    }

    let total_kb: f64 = rows.iter().map(|r| r.size_kb).sum();
    lines.push(format!(
        "{} {}",
        "ℹ".blue(),
        format!("{} files, total: {:.2} kB", rows.len(), total_kb)
            .bright_black()
            .bold()
    ));
    lines.join("\n")
}

#[async_trait]
impl Plugin for Reporter {
    fn name(&self) -> &str {
        "reporter"
    }

    async fn on_start(&self) -> Result<()> {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        if self.first_build.load(Ordering::SeqCst) {
            println!("{}", "Build started...".dimmed());
        } else {
            println!("{}", "Rebuilding...".dimmed());
        }
        Ok(())
    }

    async fn on_end(&self, result: &BuildResult) -> Result<()> {
        if !result.succeeded() {
            println!("{}", "build failed.".red());
            for error in &result.errors {
                println!("  {} {}", "✗".red(), error);
            }
            return Ok(());
        }

        println!(
            "{} {} modules transformed.",
            "✓".green(),
            result.input_count.unwrap_or(0)
        );

        let rows: Vec<SizeRow> = {
            let cache = self.cache.lock().await;
            cache
                .records()
                .into_iter()
                .map(|record| SizeRow {
                    path: self.display_path(&record.logical_name),
                    size_kb: record.bytes.len() as f64 / KB,
                    gzip_kb: gzip_size(&record.bytes) as f64 / KB,
                })
                .collect()
        };
        if !rows.is_empty() {
            println!("{}", format_summary(&rows));
        }

        println!(
            "{}",
            format!("✓ built in {}.", format_elapsed(self.elapsed())).green()
        );
        self.first_build.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::BuildCache;
    use crate::bundler::BuildMessage;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(42)), "42ms");
        assert_eq!(format_elapsed(Duration::from_millis(1000)), "1000ms");
        assert_eq!(format_elapsed(Duration::from_millis(1534)), "1.53s");
    }

    #[test]
    fn gzip_shrinks_repetitive_input() {
        let input = "a".repeat(10_000);
        let size = gzip_size(input.as_bytes());
        assert!(size > 0 && size < 200);
    }

    #[test]
    fn summary_lists_every_row_and_total() {
        colored::control::set_override(false);
        let rows = vec![
            SizeRow {
                path: "dist/theme.js".to_string(),
                size_kb: 1.5,
                gzip_kb: 0.5,
            },
            SizeRow {
                path: "dist/user.css".to_string(),
                size_kb: 0.25,
                gzip_kb: 0.1,
            },
        ];
        let summary = format_summary(&rows);
        assert!(summary.contains("dist/theme.js"));
        assert!(summary.contains("1.50 kB"));
        assert!(summary.contains("gzip:  0.10 kB"));
        assert!(summary.contains("2 files, total: 1.75 kB"));
    }

    #[tokio::test]
    async fn second_build_is_a_rebuild() {
        let cache = BuildCache::shared();
        let reporter = Reporter::new(cache, Path::new("/p"), Path::new("/p/dist"));
        assert_eq!(reporter.display_path("a.js"), "dist/a.js");

        reporter.on_start().await.unwrap();
        reporter
            .on_end(&BuildResult {
                errors: vec![BuildMessage::new("x")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(reporter.first_build.load(Ordering::SeqCst));

        reporter.on_start().await.unwrap();
        reporter.on_end(&BuildResult::default()).await.unwrap();
        assert!(!reporter.first_build.load(Ordering::SeqCst));
    }
}
