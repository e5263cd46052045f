/// Frame rate measured over one-second windows of frame time.
///
/// Driven by the frame delta the main loop already has, so it needs no
/// clock of its own.
#[derive(Debug, Clone, Default)]
pub struct FpsCounter {
    frame_count: u32,
    accumulated: f32,
    current_fps: f32,
}

impl FpsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one frame of `dt` seconds. Returns the new rate whenever a
    /// full second has accumulated.
    pub fn update(&mut self, dt: f32) -> Option<f32> {
        self.frame_count += 1;
        self.accumulated += dt.max(0.0);

        if self.accumulated >= 1.0 {
            self.current_fps = self.frame_count as f32 / self.accumulated;
            self.accumulated = 0.0;
            self.frame_count = 0;
            return Some(self.current_fps);
        }

        None
    }

    /// Rate of the last completed window.
    #[must_use]
    pub fn current(&self) -> f32 {
        self.current_fps
    }
}
