//! `precl devices` command - List platforms and devices.

use colored::Colorize;
use precl::{
    describe_platforms, ComputeBackend, CpuBackend, DeviceId, DeviceKind, PlatformInfo,
};

use crate::error::CliResult;

use super::{opencl_backend, parse_backend, BackendKind};

/// Execute the `devices` command.
pub fn execute(backend: &str) -> CliResult<()> {
    let platforms = match parse_backend(backend)? {
        BackendKind::Cpu => list(&CpuBackend::new())?,
        BackendKind::OpenCl => list(&opencl_backend()?)?,
    };

    if platforms.is_empty() {
        println!("{} No compute platforms found", "Warning:".yellow());
        return Ok(());
    }

    for line in render(&platforms) {
        println!("{}", line);
    }
    Ok(())
}

fn list<B: ComputeBackend>(backend: &B) -> CliResult<Vec<PlatformInfo>> {
    Ok(describe_platforms(backend)?)
}

/// Text lines for the listing. The device a build would use is marked.
fn render(platforms: &[PlatformInfo]) -> Vec<String> {
    let selected = selected_device(platforms);
    let mut lines = Vec::new();

    for platform in platforms {
        lines.push(format!(
            "{} {} {}",
            format!("[{}]", platform.index).dimmed(),
            platform.name.bright_white(),
            format!("({}, {})", platform.vendor, platform.version).dimmed()
        ));

        if platform.devices.is_empty() {
            lines.push(format!("    {}", "no devices".dimmed()));
        }

        for device in &platform.devices {
            let marker = if Some((platform.index, device.id)) == selected {
                "*".bright_green()
            } else {
                " ".normal()
            };
            lines.push(format!(
                "  {} {} {} {}",
                marker,
                device.name,
                format!("[{}]", device.kind).bright_yellow(),
                format!("{} / driver {}", device.vendor, device.driver_version).dimmed()
            ));
        }
    }

    lines
}

/// First device of the preferred kind on the first platform.
fn selected_device(platforms: &[PlatformInfo]) -> Option<(usize, DeviceId)> {
    let platform = platforms.first()?;
    DeviceKind::PREFERENCE.iter().find_map(|kind| {
        platform
            .devices
            .iter()
            .find(|d| d.kind == *kind)
            .map(|d| (platform.index, d.id))
    })
}
