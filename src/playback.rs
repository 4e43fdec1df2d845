use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use miniaudio::{Device, DeviceConfig, DeviceType, Format};

/// Plays one record's samples through the default output device.
///
/// The device is opened on the first `play` and reopened when the sample
/// rate changes. Position is tracked in the audio callback.
pub struct AudioPlayer {
    device: Option<Device>,
    device_rate: u32,
    playback_data: Arc<Mutex<PlaybackData>>,
}

struct PlaybackData {
    samples: Vec<f32>,
    sample_rate: u32,
    /// Time of sample 0, so positions come out on the record's time axis
    offset_seconds: f64,
    position: usize,
    playing: bool,
}

impl PlaybackData {
    /// Audio callback body: copy samples out, stop at the end.
    fn fill(&mut self, out: &mut [f32]) {
        for sample in out {
            if self.playing && self.position < self.samples.len() {
                *sample = self.samples[self.position];
                self.position += 1;
            } else {
                self.playing = false;
                *sample = 0.0;
            }
        }
    }
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self {
            device: None,
            device_rate: 0,
            playback_data: Arc::new(Mutex::new(PlaybackData {
                samples: Vec::new(),
                sample_rate: 48000,
                offset_seconds: 0.0,
                position: 0,
                playing: false,
            })),
        }
    }

    fn data(&self) -> MutexGuard<'_, PlaybackData> {
        self.playback_data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the loaded audio. Stops playback.
    pub fn load(&mut self, samples: &[f32], sample_rate: u32, offset_seconds: f64) {
        let mut data = self.data();
        data.samples = samples.to_vec();
        data.sample_rate = sample_rate.max(1);
        data.offset_seconds = offset_seconds;
        data.position = 0;
        data.playing = false;
    }

    pub fn has_audio(&self) -> bool {
        !self.data().samples.is_empty()
    }

    /// Start playing at `seconds` on the record's time axis.
    pub fn play_from(&mut self, seconds: f64) -> anyhow::Result<()> {
        let sample_rate = self.data().sample_rate;
        if self.device.is_none() || self.device_rate != sample_rate {
            self.init_device(sample_rate)?;
        }
        self.seek_to(seconds);
        self.data().playing = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.data().playing = false;
    }

    pub fn seek_to(&self, seconds: f64) {
        let mut data = self.data();
        let relative = (seconds - data.offset_seconds).max(0.0);
        let sample = (relative * data.sample_rate as f64) as usize;
        data.position = sample.min(data.samples.len());
    }

    pub fn is_playing(&self) -> bool {
        self.data().playing
    }

    pub fn position_seconds(&self) -> f64 {
        let data = self.data();
        data.offset_seconds + data.position as f64 / data.sample_rate as f64
    }

    /// Flip the playing flag without a device, as the audio callback would.
    #[cfg(test)]
    pub(crate) fn set_playing(&self, playing: bool) {
        self.data().playing = playing;
    }

    fn init_device(&mut self, sample_rate: u32) -> anyhow::Result<()> {
        // Drop the old device before opening a new one
        self.device = None;
        let playback_data = Arc::clone(&self.playback_data);

        let mut config = DeviceConfig::new(DeviceType::Playback);
        config.playback_mut().set_format(Format::F32);
        config.playback_mut().set_channels(1);
        config.set_sample_rate(sample_rate);

        config.set_data_callback(move |_device, output, _input| {
            let mut data = playback_data.lock().unwrap_or_else(PoisonError::into_inner);
            data.fill(output.as_samples_mut::<f32>());
        });

        let device = Device::new(None, &config)
            .map_err(|e| anyhow::anyhow!("Failed to create audio device: {:?}", e))?;

        device
            .start()
            .map_err(|e| anyhow::anyhow!("Failed to start audio device: {:?}", e))?;

        log::info!("Audio device opened at {} Hz", sample_rate);
        self.device = Some(device);
        self.device_rate = sample_rate;
        Ok(())
    }
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_and_position_use_record_time() {
        let mut player = AudioPlayer::new();
        player.load(&[0.0; 1000], 100, 600.0);
        player.seek_to(603.5);
        assert!((player.position_seconds() - 603.5).abs() < 1e-9);
        player.seek_to(0.0);
        assert_eq!(player.position_seconds(), 600.0);
        player.seek_to(10_000.0);
        assert_eq!(player.position_seconds(), 610.0);
    }

    #[test]
    fn fill_stops_at_end() {
        let mut data = PlaybackData {
            samples: vec![0.5, 0.25, 0.125],
            sample_rate: 10,
            offset_seconds: 0.0,
            position: 1,
            playing: true,
        };
        let mut out = [1.0f32; 4];
        data.fill(&mut out);
        assert_eq!(out, [0.25, 0.125, 0.0, 0.0]);
        assert!(!data.playing);
        assert_eq!(data.position, 3);
    }

    #[test]
    fn fill_outputs_silence_when_stopped() {
        let mut data = PlaybackData {
            samples: vec![0.5; 8],
            sample_rate: 10,
            offset_seconds: 0.0,
            position: 0,
            playing: false,
        };
        let mut out = [1.0f32; 4];
        data.fill(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(data.position, 0);
    }
}
