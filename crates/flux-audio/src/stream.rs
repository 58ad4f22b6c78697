//! Audio stream management

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig,
    SupportedStreamConfig,
};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use flux_core::{BufferSize, Sample};

use crate::{AudioConfig, AudioError, AudioResult};

/// Block callback: interleaved stereo input, interleaved stereo output
/// (output is pre-filled with zeros).
pub type AudioCallback = Box<dyn FnMut(&[Sample], &mut [Sample]) + Send + 'static>;

/// Engine-side channel count of the callback buffers
pub const CALLBACK_CHANNELS: usize = 2;

/// Device periods larger than this many blocks are processed in slices
const MAX_PERIOD_BLOCKS: usize = 4;

/// Device health shared between the stream callbacks and the control thread
#[derive(Debug, Default)]
pub struct DeviceStatus {
    failed: AtomicBool,
    message: Mutex<Option<String>>,
    recoverable_errors: AtomicU64,
}

impl DeviceStatus {
    /// Record an unrecoverable failure (first message wins)
    pub fn report_failure(&self, message: impl Into<String>) {
        let mut slot = self.message.lock();
        if slot.is_none() {
            *slot = Some(message.into());
        }
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The fatal error, if the device has failed
    pub fn error(&self) -> Option<AudioError> {
        if !self.is_failed() {
            return None;
        }
        let message = self
            .message
            .lock()
            .clone()
            .unwrap_or_else(|| "device failure".to_string());
        Some(AudioError::Device(message))
    }

    pub fn recoverable_errors(&self) -> u64 {
        self.recoverable_errors.load(Ordering::Relaxed)
    }

    fn on_stream_error(&self, err: cpal::StreamError, direction: &str) {
        match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("Audio {} device disconnected", direction);
                self.report_failure(format!("{} device not available", direction));
            }
            other => {
                log::error!("Audio {} stream error: {}", direction, other);
                self.recoverable_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Running device stream wrapper
pub struct AudioStream {
    output_stream: Stream,
    input_stream: Option<Stream>,
    status: Arc<DeviceStatus>,
    running: AtomicBool,
    config: AudioConfig,
}

impl AudioStream {
    /// Create a stream driving `callback` from the output device, optionally
    /// feeding it captured input from `input_device`.
    pub fn new(
        output_device: &Device,
        input_device: Option<&Device>,
        config: AudioConfig,
        callback: AudioCallback,
    ) -> AudioResult<Self> {
        let status = Arc::new(DeviceStatus::default());

        let (input_stream, input_consumer) = match input_device {
            Some(device) => {
                let input_config = get_input_stream_config(device, &config)?;
                let (producer, consumer) = RingBuffer::new(
                    config.buffer_size.as_usize() * CALLBACK_CHANNELS * MAX_PERIOD_BLOCKS * 2,
                );
                let stream = build_input_stream(
                    device,
                    &input_config,
                    config.buffer_size,
                    producer,
                    Arc::clone(&status),
                )?;
                (Some(stream), Some(consumer))
            }
            None => (None, None),
        };

        let output_config = get_output_stream_config(output_device, &config)?;
        let output_stream = build_output_stream(
            output_device,
            &output_config,
            config.buffer_size,
            callback,
            input_consumer,
            Arc::clone(&status),
        )?;

        Ok(Self {
            output_stream,
            input_stream,
            status,
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Start the audio stream
    pub fn start(&self) -> AudioResult<()> {
        if let Some(ref stream) = self.input_stream {
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
        }

        self.output_stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Pause the audio stream
    pub fn stop(&self) -> AudioResult<()> {
        self.output_stream
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        if let Some(ref stream) = self.input_stream {
            stream
                .pause()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
        }

        self.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Device health flag (shared with the stream callbacks)
    pub fn status(&self) -> Arc<DeviceStatus> {
        Arc::clone(&self.status)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

fn get_output_stream_config(
    device: &Device,
    config: &AudioConfig,
) -> AudioResult<SupportedStreamConfig> {
    let sample_rate = cpal::SampleRate(config.sample_rate.as_u32());
    let channels = config.output_channels;

    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= channels
            && supported.min_sample_rate() <= sample_rate
            && supported.max_sample_rate() >= sample_rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(sample_rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "No matching output config for {} channels @ {}Hz",
        channels,
        config.sample_rate.as_u32()
    )))
}

fn get_input_stream_config(
    device: &Device,
    config: &AudioConfig,
) -> AudioResult<SupportedStreamConfig> {
    let sample_rate = cpal::SampleRate(config.sample_rate.as_u32());

    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= 1
            && supported.min_sample_rate() <= sample_rate
            && supported.max_sample_rate() >= sample_rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(sample_rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "No matching input config @ {}Hz",
        config.sample_rate.as_u32()
    )))
}

fn build_output_stream(
    device: &Device,
    supported_config: &SupportedStreamConfig,
    buffer_size: BufferSize,
    mut callback: AudioCallback,
    mut input: Option<Consumer<Sample>>,
    status: Arc<DeviceStatus>,
) -> AudioResult<Stream> {
    let channels = supported_config.channels() as usize;

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size.as_usize() as u32),
    };

    // Pre-allocate buffers for the callback
    let max_frames = buffer_size.as_usize() * MAX_PERIOD_BLOCKS;
    let mut input_buffer = vec![0.0 as Sample; max_frames * CALLBACK_CHANNELS];
    let mut output_buffer = vec![0.0 as Sample; max_frames * CALLBACK_CHANNELS];

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let total_frames = data.len() / channels;
                let mut offset = 0;

                while offset < total_frames {
                    let frames = (total_frames - offset).min(max_frames);
                    let len = frames * CALLBACK_CHANNELS;

                    match input.as_mut() {
                        Some(consumer) => {
                            for s in input_buffer[..len].iter_mut() {
                                *s = consumer.pop().unwrap_or(0.0);
                            }
                        }
                        None => input_buffer[..len].fill(0.0),
                    }

                    output_buffer[..len].fill(0.0);
                    callback(&input_buffer[..len], &mut output_buffer[..len]);

                    let device_slice = &mut data[offset * channels..(offset + frames) * channels];
                    for (frame, out) in device_slice
                        .chunks_mut(channels)
                        .zip(output_buffer[..len].chunks(CALLBACK_CHANNELS))
                    {
                        match channels {
                            1 => frame[0] = (out[0] + out[1]) * 0.5,
                            _ => {
                                frame[0] = out[0];
                                frame[1] = out[1];
                                for sample in frame.iter_mut().skip(2) {
                                    *sample = 0.0;
                                }
                            }
                        }
                    }

                    offset += frames;
                }
            },
            move |err| status.on_stream_error(err, "output"),
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

fn build_input_stream(
    device: &Device,
    supported_config: &SupportedStreamConfig,
    buffer_size: BufferSize,
    mut producer: Producer<Sample>,
    status: Arc<DeviceStatus>,
) -> AudioResult<Stream> {
    let channels = supported_config.channels() as usize;

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size.as_usize() as u32),
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Keep whole stereo frames; drop input when the output side lags
                for frame in data.chunks(channels) {
                    if producer.slots() < CALLBACK_CHANNELS {
                        break;
                    }
                    let left = frame[0];
                    let right = if channels > 1 { frame[1] } else { left };
                    let _ = producer.push(left);
                    let _ = producer.push(right);
                }
            },
            move |err| status.on_stream_error(err, "input"),
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
