//! wenvk demo viewer
//!
//! Clears an offscreen image to an animated color, streams per-frame uniforms through an
//! `NBuffer` and presents through the instance's end-of-frame blit.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p wenvk-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--no-vsync`: Present without waiting for vblank
//! - `--render-size <W>x<H>`: Size of the offscreen image (default: window size)
//! - `-h, --help`: Print help message
//!
//! ## Keys
//!
//! - `E`: Toggle blitting the error texture over the draw image
//! - `N`: Toggle nearest filtering for the final blit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use wenvk_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 240;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let mut config = AppConfig::new("wenvk viewer")
        .with_size(WIDTH, HEIGHT)
        .with_target_fps(TARGET_FPS);

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--no-vsync" => config = config.with_vsync(false),
            "--render-size" => {
                if let Some((w, h)) = args.get(i + 1).and_then(|s| parse_size(s)) {
                    config = config.with_render_size(w, h);
                    i += 1;
                } else {
                    anyhow::bail!("--render-size expects <W>x<H>");
                }
            }
            other => eprintln!("Ignoring unknown argument '{other}'"),
        }
        i += 1;
    }

    run_app::<Viewer>(config)
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let (w, h) = (w.parse().ok()?, h.parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

fn print_help() {
    eprintln!(
        "wenvk demo viewer

USAGE:
    cargo run -p wenvk-viewer -- [OPTIONS]

OPTIONS:
    --no-vsync              Present without waiting for vblank
    --render-size <W>x<H>   Size of the offscreen image (default: window size)
    -h, --help              Print this help message

KEYS:
    E                       Toggle blitting the error texture over the draw image
    N                       Toggle nearest filtering for the final blit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_render_size() {
        assert_eq!(parse_size("640x360"), Some((640, 360)));
        assert_eq!(parse_size("0x360"), None);
        assert_eq!(parse_size("640"), None);
        assert_eq!(parse_size("ax2"), None);
    }
}
