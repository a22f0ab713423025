// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ember_render::RenderSize;
use winit::{dpi::PhysicalSize, event_loop::ActiveEventLoop, window::Window};

pub use winit;

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Creates the fixed-size window the renderer presents into.
pub fn create_window(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(desc.title.clone())
        .with_inner_size(PhysicalSize::new(desc.width, desc.height))
        .with_resizable(false);
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = framebuffer_size(&window);
    tracing::info!("window '{}' created ({}x{})", desc.title, size.width, size.height);
    Ok(window)
}

/// Current framebuffer size in pixels, never smaller than 1x1.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    let size = window.inner_size();
    RenderSize {
        width: size.width.max(1),
        height: size.height.max(1),
    }
}
