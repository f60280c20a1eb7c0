//! ALSA PCM device wrappers for capture and playback.
//!
//! Both directions run S16LE interleaved; rates and channel counts are
//! negotiated with the hardware and the actual values reported back so
//! the period loops size their buffers correctly.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters actually granted by the hardware.
#[derive(Debug, Clone)]
pub struct DeviceParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames; one period is one iteration of the I/O loop.
    pub period_size: usize,
}

/// Open a PCM device for capture.
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, DeviceParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels)
}

/// Open a PCM device for playback.
pub fn open_playback(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, DeviceParams)> {
    open_pcm(device, Direction::Playback, sample_rate, channels)
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, DeviceParams)> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("failed to open {} device '{}'", dir_name, device))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        DeviceParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
