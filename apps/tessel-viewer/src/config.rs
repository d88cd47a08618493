//! Viewer configuration and command-line parsing.

use anyhow::{anyhow, bail, Context};
use ash::vk;
use tessel_gfx::GfxSettings;

/// Viewer configuration.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Swapchain image count.
    pub back_buffers: u32,
    /// Present mode the surface must support.
    pub present_mode: vk::PresentModeKHR,
    /// Exit after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "Tessel Viewer".to_string(),
            width: 1280,
            height: 720,
            validation: cfg!(debug_assertions),
            back_buffers: 3,
            present_mode: vk::PresentModeKHR::FIFO,
            max_frames: None,
        }
    }
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Command {
    Run(ViewerConfig),
    Help,
}

impl ViewerConfig {
    /// Parse arguments, excluding the program name.
    pub fn parse<I>(args: I) -> anyhow::Result<Command>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{name} expects a value"))
            };

            match arg.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                "--back-buffers" => {
                    let raw = value("--back-buffers")?;
                    config.back_buffers = raw
                        .parse()
                        .with_context(|| format!("Invalid back buffer count: {raw}"))?;
                }
                "--present-mode" => config.present_mode = parse_present_mode(&value("--present-mode")?)?,
                "--size" => (config.width, config.height) = parse_size(&value("--size")?)?,
                "--frames" => {
                    let raw = value("--frames")?;
                    config.max_frames = Some(
                        raw.parse()
                            .with_context(|| format!("Invalid frame count: {raw}"))?,
                    );
                }
                other => bail!("Unknown argument: {other}"),
            }
        }

        Ok(Command::Run(config))
    }

    /// Core settings derived from this configuration.
    pub fn gfx_settings(&self) -> GfxSettings {
        GfxSettings::new()
            .with_app_name(self.title.clone())
            .with_validation(self.validation)
            .with_back_buffers(self.back_buffers)
            .with_present_mode(self.present_mode)
    }
}

fn parse_present_mode(raw: &str) -> anyhow::Result<vk::PresentModeKHR> {
    match raw.to_ascii_lowercase().as_str() {
        "fifo" => Ok(vk::PresentModeKHR::FIFO),
        "fifo-relaxed" => Ok(vk::PresentModeKHR::FIFO_RELAXED),
        "mailbox" => Ok(vk::PresentModeKHR::MAILBOX),
        "immediate" => Ok(vk::PresentModeKHR::IMMEDIATE),
        _ => bail!("Unknown present mode: {raw}"),
    }
}

fn parse_size(raw: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("Size must look like WIDTHxHEIGHT, got {raw}"))?;

    let width: u32 = width.parse().with_context(|| format!("Invalid width in {raw}"))?;
    let height: u32 = height.parse().with_context(|| format!("Invalid height in {raw}"))?;

    if width == 0 || height == 0 {
        bail!("Window size must be non-zero, got {raw}");
    }

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Command> {
        ViewerConfig::parse(args.iter().map(|s| (*s).to_string()))
    }

    fn run(args: &[&str]) -> ViewerConfig {
        match parse(args) {
            Ok(Command::Run(config)) => config,
            other => panic!("expected a run command, got {other:?}"),
        }
    }

    #[test]
    fn no_arguments_use_defaults() {
        let config = run(&[]);
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.back_buffers, 3);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(config.max_frames, None);
    }

    #[test]
    fn flags_override_defaults() {
        let config = run(&[
            "--no-validation",
            "--back-buffers",
            "2",
            "--present-mode",
            "Mailbox",
            "--size",
            "800x600",
            "--frames",
            "120",
        ]);

        assert!(!config.validation);
        assert_eq!(config.back_buffers, 2);
        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.max_frames, Some(120));
    }

    #[test]
    fn help_short_circuits() {
        assert!(matches!(parse(&["--size", "1x1", "-h"]), Ok(Command::Help)));
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["--back-buffers"]).is_err());
        assert!(parse(&["--back-buffers", "three"]).is_err());
        assert!(parse(&["--present-mode", "vsync"]).is_err());
        assert!(parse(&["--size", "800"]).is_err());
        assert!(parse(&["--size", "0x600"]).is_err());
    }

    #[test]
    fn settings_carry_swapchain_choices() {
        let config = run(&["--back-buffers", "2", "--present-mode", "immediate"]);
        let settings = config.gfx_settings();

        assert_eq!(settings.num_back_buffers, 2);
        assert_eq!(settings.swapchain_present_mode, vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(settings.frames_in_flight(), 1);
        assert_eq!(settings.app_name, "Tessel Viewer");
    }
}
