//! Headless probe runs for the command line tool

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use fontpipe_core::dummy_surface::{DummySurface, ManualEventLoop, RenderMode};
use fontpipe_core::{
    EventLoop, FontDefinition, FontEvent, FontFormat, FontLoader, FontRecord, NoFetcher,
    PipelineConfig, UsageType,
};

/// How a probe run is set up
#[derive(Clone, Debug)]
pub struct ProbeOptions {
    pub usage: UsageType,
    pub render_mode: RenderMode,
    pub config: PipelineConfig,
    /// Release every font at the end and report what was left behind
    pub release: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            usage: UsageType::Character,
            render_mode: RenderMode::Active,
            config: PipelineConfig::default(),
            release: false,
        }
    }
}

/// Outcome of provisioning one file
#[derive(Clone, Debug)]
pub struct FontReport {
    pub path: PathBuf,
    pub record: FontRecord,
    /// Container format read from the file signature
    pub sniffed: Option<FontFormat>,
    /// Virtual time from request to record
    pub elapsed: Duration,
    /// Surface nodes owned by this family once every timer has run
    pub nodes: Vec<String>,
    pub events: Vec<FontEvent>,
    /// Nodes still present after release, if released
    pub leftovers: Option<Vec<String>>,
}

impl fmt::Display for FontReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        writeln!(f, "{}", self.path.display())?;
        writeln!(f, "  family:        {}", r.family)?;
        writeln!(f, "  display name:  {}", r.display_name)?;
        match self.sniffed {
            Some(sniffed) if sniffed != r.format => {
                writeln!(f, "  format:        {} (signature says {})", r.format, sniffed)?
            }
            _ => writeln!(f, "  format:        {}", r.format)?,
        }
        writeln!(f, "  size:          {} bytes, {} byte data URI", r.byte_len, r.encoded_payload.len())?;
        writeln!(f, "  verification:  {:?} after {:?}", r.verification, self.elapsed)?;
        if let Some(backup) = &r.backup_family {
            writeln!(f, "  backup family: {backup}")?;
        }
        writeln!(f, "  nodes:         {}", self.nodes.join(", "))?;
        let events: Vec<&str> = self
            .events
            .iter()
            .map(|e| match e {
                FontEvent::Loaded(_) => "loaded",
                FontEvent::Verified { .. } => "verified",
                FontEvent::Released { .. } => "released",
            })
            .collect();
        writeln!(f, "  events:        {}", events.join(", "))?;
        if let Some(leftovers) = &self.leftovers {
            if leftovers.is_empty() {
                writeln!(f, "  released:      clean")?;
            } else {
                writeln!(f, "  released:      left {}", leftovers.join(", "))?;
            }
        }
        Ok(())
    }
}

fn read_definition(path: &Path, usage: UsageType) -> Result<(FontDefinition, Option<FontFormat>)> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let sniffed = FontFormat::sniff(&bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let definition = FontDefinition::from_upload(&file_name, bytes, usage)
        .with_context(|| format!("cannot provision {}", path.display()))?;
    Ok((definition, sniffed))
}

/// Run every file through one loader on a dummy surface
pub fn probe_files(paths: &[PathBuf], options: &ProbeOptions) -> Result<Vec<FontReport>> {
    let surface = Rc::new(DummySurface::new().with_render_mode(options.render_mode));
    let event_loop = Rc::new(ManualEventLoop::new());
    let loader = FontLoader::new(
        surface.clone(),
        event_loop.clone(),
        Rc::new(NoFetcher),
        options.config.clone(),
    );

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let (definition, sniffed) = read_definition(path, options.usage)?;
        let events = loader.subscribe();

        let started = event_loop.elapsed();
        let record = event_loop
            .block_on(loader.acquire(definition))
            .with_context(|| format!("provisioning {} failed", path.display()))?;
        let elapsed = event_loop.elapsed() - started;
        tracing::debug!("{} provisioned at {}ms", record.family, event_loop.now_millis());

        event_loop.run_until_idle();
        let nodes = surface.nodes_mentioning(&record.family);
        let mut report = FontReport {
            path: path.clone(),
            record,
            sniffed,
            elapsed,
            nodes,
            events: Vec::new(),
            leftovers: None,
        };

        if options.release {
            loader.release(&report.record.family);
            event_loop.run_until_idle();
            report.leftovers = Some(surface.nodes_mentioning(&report.record.family));
        }
        while let Ok(event) = events.try_recv() {
            report.events.push(event);
        }
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_font(name: &str, bytes: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fontpipe-report-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_probe_reports_active_font() {
        let path = write_font("Kai.ttf", &[0, 1, 0, 0, 1, 2, 3, 4]);
        let reports = probe_files(&[path], &ProbeOptions::default()).unwrap();
        assert_eq!(reports.len(), 1);

        let report = &reports[0];
        assert!(report.record.family.starts_with("custom_Kai_"));
        assert_eq!(report.sniffed, Some(FontFormat::Ttf));
        assert_eq!(report.elapsed, Duration::from_millis(200));
        assert!(report.events.iter().any(|e| matches!(e, FontEvent::Loaded(_))));
        assert!(report.to_string().contains("verification:  Active"));
    }

    #[test]
    fn test_probe_release_is_clean() {
        let path = write_font("Release.otf", b"OTTO\x00\x01\x02");
        let options = ProbeOptions {
            render_mode: RenderMode::Fallback,
            release: true,
            ..ProbeOptions::default()
        };
        let reports = probe_files(&[path], &options).unwrap();
        assert_eq!(reports[0].leftovers, Some(Vec::new()));
        assert!(reports[0].record.backup_family.is_some());
        assert!(reports[0].to_string().contains("released:      clean"));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let path = write_font("Empty.woff2", &[]);
        let err = probe_files(&[path], &ProbeOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("font source is empty"));
    }
}
