// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! CLI output reporter with colored formatting

use crate::io::{ExportSummary, ManifestEntry};
use crate::report::{format_volume, Method, VolumeReport};
use crate::units::format_deviation;
use colored::*;
use std::time::Duration;

/// CLI reporter for formatted output
pub struct Reporter;

impl Reporter {
    /// Print the full volume report block
    pub fn report_volume(report: &VolumeReport) {
        println!("\n{}", "━".repeat(80).bright_black());
        let name = report
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| report.label.clone())
            .unwrap_or_default();
        println!("{} {}", "File:".bold(), name.cyan());
        println!("{}", "━".repeat(80).bright_black());

        match report.method {
            Method::Exact => println!("{} {}", "✅".green(), "Closed solid, exact volume".green().bold()),
            Method::Voxel => println!("{} {}", "⚠️ ".yellow(), "Open shape, voxel estimate".yellow().bold()),
        }

        println!("\n{}", "Result:".bold());
        println!("  {}", report.result_line().cyan().bold());
        println!(
            "  {} {} mm3",
            "Raw:".bright_black(),
            format_volume(report.raw_volume_mm3)
        );
        println!("  {} {}", "Faces:".bright_black(), report.face_count);

        if !report.repair_attempts.is_empty() {
            println!("\n{}", "Sewing:".bold());
            for attempt in &report.repair_attempts {
                let status = if attempt.closed { "closed".green() } else { "open".red() };
                println!(
                    "  {} {:<8} {} {} free, {} non-manifold, {} vertices merged",
                    "tolerance".bright_black(),
                    format!("{} mm", attempt.tolerance),
                    status,
                    attempt.free_edges,
                    attempt.non_manifold_edges,
                    attempt.stats.merged_vertices
                );
            }
        }

        if report.shells.len() > 1 {
            println!("\n{}", "Shells:".bold());
            for shell in &report.shells {
                let kind = if shell.is_void { "void" } else { "solid" };
                println!(
                    "  {} {:>3} {:<5} {} mm3",
                    "#".bright_black(),
                    shell.index,
                    kind,
                    format_volume(shell.volume)
                );
            }
        }

        if let Some(voxel) = &report.voxel {
            let [nx, ny, nz] = voxel.extents.dims;
            println!("\n{}", "Voxels:".bold());
            println!(
                "  {} {}x{}x{} at {} mm",
                "Grid:".bright_black(),
                nx,
                ny,
                nz,
                voxel.extents.pitch
            );
            println!(
                "  {} {} inside, {} boundary, {} outside",
                "Cells:".bright_black(),
                voxel.inside_cells,
                voxel.boundary_cells,
                voxel.outside_cells
            );
            Self::print_deviation(report.deviation_percent);
        }

        if let Some(bbox) = &report.bbox {
            println!("\n{}", "Bounding box:".bold());
            let [x, y, z] = bbox.extents;
            println!("  {} {:.3} x {:.3} x {:.3} mm", "Extents:".bright_black(), x, y, z);
            println!(
                "  {} {} {}",
                "Volume:".bright_black(),
                format_volume(bbox.volume),
                report.unit
            );
        }

        if let Some(export) = &report.export {
            println!();
            Self::report_export(export);
        }

        println!("\n{}", "Performance:".bold());
        println!(
            "  {} {}",
            "Total:".bright_black(),
            Self::format_duration(Duration::from_millis(report.elapsed_ms as u64)).yellow()
        );

        if let Some(hint) = &report.hint {
            Self::report_hint(hint);
        }
        println!("{}", "━".repeat(80).bright_black());
    }

    pub fn report_export(summary: &ExportSummary) {
        println!(
            "{} {} faces written to {}",
            "Exported:".bold(),
            summary.written.len().to_string().cyan(),
            summary.directory.display().to_string().cyan()
        );
        for skipped in &summary.skipped {
            println!("  {} {}", "skipped".yellow(), skipped.reason.bright_black());
        }
    }

    pub fn report_pick(entry: &ManifestEntry) {
        let file = entry.file.as_deref().unwrap_or("-");
        let step = entry
            .step_id
            .map(|id| format!("#{id}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {}  {} {}  {} {}  {} {}",
            "Face:".bold(),
            entry.index.to_string().cyan(),
            "File:".bright_black(),
            file,
            "Entity:".bright_black(),
            step,
            "Surface:".bright_black(),
            entry.surface
        );
    }

    /// Report error
    pub fn report_error(message: &str) {
        eprintln!("\n{} {}", "❌ Error:".red().bold(), message);
    }

    /// Report warning
    pub fn report_warning(message: &str) {
        println!("\n{} {}", "⚠️  Warning:".yellow().bold(), message);
    }

    pub fn report_hint(message: &str) {
        println!("\n{} {}", "💡 Hint:".bright_blue().bold(), message);
    }

    /// Report info
    pub fn report_info(message: &str) {
        println!("{} {}", "ℹ️".bright_blue(), message);
    }

    /// Deviation colored by size: under 1% green, under 5% yellow, else red
    fn print_deviation(deviation: Option<f64>) {
        let text = format_deviation(deviation);
        let formatted = match deviation {
            None => text.bright_black(),
            Some(d) if d < 1.0 => text.green(),
            Some(d) if d < 5.0 => text.yellow(),
            Some(_) => text.red(),
        };
        println!("  {} {}", "Deviation:".bright_black(), formatted);
    }

    /// Format duration for display
    pub fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();

        if micros < 1_000 {
            format!("{}µs", micros)
        } else if micros < 1_000_000 {
            format!("{:.2}ms", micros as f64 / 1_000.0)
        } else {
            format!("{:.2}s", micros as f64 / 1_000_000.0)
        }
    }

    /// Print success message
    pub fn success(message: &str) {
        println!("{} {}", "✅".green(), message.green());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(Reporter::format_duration(Duration::from_micros(500)), "500µs");
        assert_eq!(Reporter::format_duration(Duration::from_millis(5)), "5.00ms");
        assert_eq!(Reporter::format_duration(Duration::from_secs(2)), "2.00s");
    }
}
