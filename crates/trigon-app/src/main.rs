// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

use trigon_core::{init_tracing, install_interrupt_flag};
use trigon_image::ImageStream;
use trigon_platform::WinitWsi;
use trigon_render::{DamageTracker, Wsi};
use trigon_render_gl::{compute::run_compute_demo, TextureViewer};
use trigon_render_vk::{bootstrap, RecreatePolicy, Session, SessionConfig, ShaderPaths};

mod config;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, default_value = "trigon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    demo: Demo,
}

#[derive(Subcommand, Debug)]
enum Demo {
    /// Vulkan triangle
    Triangle {
        /// Build the swapchain once and never react to surface changes
        #[arg(long = "static")]
        fixed: bool,
    },
    /// Stream a PNG/JPEG into a GL texture and show it
    Image { path: Option<PathBuf> },
    /// Windowless GLES compute dispatch
    Compute,
}

fn run_triangle(cfg: &AppCfg, fixed: bool) -> Result<()> {
    let shaders = cfg
        .render
        .shader_dir
        .as_ref()
        .map(ShaderPaths::in_dir)
        .unwrap_or_default();

    let mut wsi = WinitWsi::new(&cfg.window.title, cfg.window.width, cfg.window.height)?;
    let running = install_interrupt_flag(wsi.waker())?;
    let (driver, ctx) = bootstrap(&wsi, &shaders).context("vulkan bootstrap")?;

    let session_cfg = SessionConfig {
        clear_color: cfg.render.clear_color,
        acquire_timeout_ns: cfg.render.acquire_timeout_ns,
        policy: if fixed {
            RecreatePolicy::Never
        } else {
            RecreatePolicy::OnDamage
        },
    };
    // SAFETY: `ctx` was produced by `bootstrap` together with `driver`.
    let mut session = unsafe { Session::new(driver, ctx, wsi.inner_size(), session_cfg)? };
    session.run(&mut wsi, &running)
}

fn run_image(cfg: &AppCfg, path: Option<PathBuf>) -> Result<()> {
    let path = path
        .or_else(|| cfg.image.default_path.clone())
        .ok_or_else(|| anyhow!("no image given and [image] default_path is unset"))?;

    // The header decides the window size, so it is read before anything else.
    let mut image =
        ImageStream::open(&path).with_context(|| format!("open image {}", path.display()))?;
    info!(
        "{}: {:?} {}x{} {:?}",
        path.display(),
        image.kind(),
        image.width(),
        image.height(),
        image.layout()
    );

    let mut wsi = WinitWsi::new(&cfg.window.title, image.width(), image.height())?;
    let running = install_interrupt_flag(wsi.waker())?;
    let size = wsi.inner_size();
    let mut viewer = TextureViewer::new(&wsi, &wsi, size, &image)?;
    viewer.upload_image(&mut image, cfg.image.chunk_size)?;

    let mut tracker = DamageTracker::new(size);
    tracker.request_redraw();
    wsi.show();

    while running.load(Ordering::Relaxed) {
        if tracker.is_idle() && !wsi.wait_for_events(&mut tracker)? {
            info!("quit requested");
            break;
        }
        if tracker.take_reconfigure() {
            if let Some(size) = tracker.size_hint() {
                viewer.resize(size);
            }
        }
        if tracker.take_redraw() {
            viewer.render()?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_cfg(&cli.config);

    match cli.demo {
        Demo::Triangle { fixed } => run_triangle(&cfg, fixed),
        Demo::Image { path } => run_image(&cfg, path),
        Demo::Compute => {
            let limits = run_compute_demo()?;
            info!("compute limits: {limits:?}");
            Ok(())
        }
    }
}
