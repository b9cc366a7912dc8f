// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};
use trigon_render::{RenderSize, SurfaceEvents, Wsi};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    raw_window_handle::{
        DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
    },
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

enum Pending {
    Resized(RenderSize),
    Redraw,
}

struct Handler {
    attrs: WindowAttributes,
    window: Option<Window>,
    fullscreen: bool,
    quit: bool,
    pending: Vec<Pending>,
    create_error: Option<String>,
}

impl Handler {
    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        self.fullscreen = !self.fullscreen;
        window.set_fullscreen(if self.fullscreen {
            Some(Fullscreen::Borderless(None))
        } else {
            None
        });
        info!("fullscreen = {}", self.fullscreen);
    }
}

impl ApplicationHandler for Handler {
    fn user_event(&mut self, _event_loop: &ActiveEventLoop, _event: ()) {
        debug!("woken by user event");
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attrs.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(e.to_string());
                self.quit = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.quit = true;
            }
            WindowEvent::Resized(new_size) => {
                self.pending.push(Pending::Resized(RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                }));
            }
            WindowEvent::RedrawRequested => self.pending.push(Pending::Redraw),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Released,
                        logical_key,
                        ..
                    },
                ..
            } => match logical_key.as_ref() {
                Key::Named(NamedKey::Escape) => self.quit = true,
                Key::Character("f") | Key::Character("F") => self.toggle_fullscreen(),
                other => debug!("key released: {other:?}"),
            },
            _ => {}
        }
    }
}

/// `winit`-backed window with a blocking, pump-style event wait.
pub struct WinitWsi {
    event_loop: EventLoop<()>,
    handler: Handler,
}

impl WinitWsi {
    /// Connects to the window system and creates a hidden window.
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_visible(false);

        let mut wsi = Self {
            event_loop,
            handler: Handler {
                attrs,
                window: None,
                fullscreen: false,
                quit: false,
                pending: Vec::new(),
                create_error: None,
            },
        };

        // Desktop platforms deliver `resumed` on the first pump.
        let _ = wsi
            .event_loop
            .pump_app_events(Some(std::time::Duration::ZERO), &mut wsi.handler);
        if let Some(e) = wsi.handler.create_error.take() {
            bail!("create_window: {e}");
        }
        if wsi.handler.window.is_none() {
            return Err(anyhow!("window system did not resume the application"));
        }
        // Startup events are not damage; the caller drives the first frame.
        wsi.handler.pending.clear();
        Ok(wsi)
    }

    /// Unblocks a pending [`Wsi::wait_for_events`] from any thread.
    pub fn waker(&self) -> impl Fn() + Send + 'static {
        let proxy = self.event_loop.create_proxy();
        move || {
            let _ = proxy.send_event(());
        }
    }
}

impl Wsi for WinitWsi {
    fn inner_size(&self) -> RenderSize {
        self.handler
            .window
            .as_ref()
            .map(|w| {
                let s = w.inner_size();
                RenderSize {
                    width: s.width,
                    height: s.height,
                }
            })
            .unwrap_or(RenderSize {
                width: 0,
                height: 0,
            })
    }

    fn show(&mut self) {
        if let Some(w) = &self.handler.window {
            w.set_visible(true);
            w.request_redraw();
        }
    }

    fn toggle_fullscreen(&mut self) {
        self.handler.toggle_fullscreen();
    }

    fn wait_for_events(&mut self, events: &mut dyn SurfaceEvents) -> Result<bool> {
        let status = self.event_loop.pump_app_events(None, &mut self.handler);

        for p in self.handler.pending.drain(..) {
            match p {
                Pending::Resized(size) => events.surface_changed(size),
                Pending::Redraw => events.redraw_requested(),
            }
        }

        if let Some(e) = self.handler.create_error.take() {
            bail!("create_window: {e}");
        }

        Ok(!self.handler.quit && !matches!(status, PumpStatus::Exit(_)))
    }
}

impl HasWindowHandle for WinitWsi {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.handler
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for WinitWsi {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}

impl Drop for WinitWsi {
    fn drop(&mut self) {
        if let Some(w) = self.handler.window.take() {
            w.set_visible(false);
            info!("window closed");
        }
    }
}
