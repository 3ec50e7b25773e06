// viewer.rs — Optional debug window for the processed stream.
//
// Purely observational: the published output is identical whether or not a
// window is open. On a headless host window creation fails; that is
// reported once and the viewer disables itself instead of killing the
// stream.

use log::warn;
use minifb::{Window, WindowOptions};

use crate::image::Image;

const WINDOW_TITLE: &str = "lumeq — equalized output";

enum ViewerState {
    /// Window not created yet; created on the first frame so the node can
    /// be constructed headlessly as long as no frame is ever displayed.
    Pending,
    Open(Box<Window>),
    /// Creation failed; stay silent from now on.
    Disabled,
}

/// Lazily opened minifb window rendering grayscale frames.
pub struct DebugView {
    state: ViewerState,
    fb: Vec<u32>,
    width: usize,
    height: usize,
}

impl DebugView {
    pub fn new() -> Self {
        DebugView {
            state: ViewerState::Pending,
            fb: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Render one grayscale frame. Never fails the processing path.
    pub fn show(&mut self, img: &Image<u8>) {
        if img.width() == 0 || img.height() == 0 {
            return;
        }

        let needs_open = match &self.state {
            ViewerState::Pending => true,
            ViewerState::Open(_) => (img.width(), img.height()) != (self.width, self.height),
            ViewerState::Disabled => false,
        };
        if needs_open {
            self.open(img.width(), img.height());
        }

        let ViewerState::Open(window) = &mut self.state else {
            return;
        };

        blit_grayscale(img, &mut self.fb);
        if let Err(e) = window.update_with_buffer(&self.fb, self.width, self.height) {
            warn!("debug view update failed, disabling: {e}");
            self.state = ViewerState::Disabled;
        }
    }

    fn open(&mut self, width: usize, height: usize) {
        match Window::new(WINDOW_TITLE, width, height, WindowOptions::default()) {
            Ok(mut window) => {
                window.set_target_fps(60);
                self.width = width;
                self.height = height;
                self.fb = vec![0u32; width * height];
                self.state = ViewerState::Open(Box::new(window));
            }
            Err(e) => {
                warn!("debug view unavailable ({e}); continuing without display");
                self.state = ViewerState::Disabled;
            }
        }
    }
}

impl Default for DebugView {
    fn default() -> Self {
        DebugView::new()
    }
}

/// Blit a grayscale image into a packed 0x00RRGGBB framebuffer.
pub fn blit_grayscale(img: &Image<u8>, fb: &mut Vec<u32>) {
    fb.clear();
    fb.reserve(img.width() * img.height());
    for y in 0..img.height() {
        for &v in img.row(y) {
            let v = v as u32;
            fb.push((v << 16) | (v << 8) | v);
        }
    }
}
