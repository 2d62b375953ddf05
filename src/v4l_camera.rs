use crate::camera::{Camera, CameraConfig, CameraError};
use crate::types::{PixelOrder, RawFrame};
use log::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const BUFFER_COUNT: u32 = 4;

/// V4L2 camera at `/dev/video{device}`.
///
/// The requested resolution and BGR3 layout are asked for once at open;
/// whatever the driver grants is used as-is if it is a layout we can convert.
pub struct V4lCamera {
    // Declared before `device` so the stream is torn down first.
    stream: MmapStream<'static>,
    device: Device,
    width: u32,
    height: u32,
    order: PixelOrder,
}

impl V4lCamera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let open_err = |e: std::io::Error| CameraError::Open {
            device: config.device,
            reason: e.to_string(),
        };

        let device = Device::new(config.device as usize).map_err(open_err)?;
        let mut format = device.format().map_err(open_err)?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = FourCC::new(b"BGR3");
        let granted = device.set_format(&format).map_err(open_err)?;

        if granted.width != config.width || granted.height != config.height {
            warn!(
                "Camera {} granted {}x{} instead of {}x{}",
                config.device, granted.width, granted.height, config.width, config.height
            );
        }

        let order = if granted.fourcc == FourCC::new(b"BGR3") {
            PixelOrder::Bgr
        } else if granted.fourcc == FourCC::new(b"RGB3") {
            PixelOrder::Rgb
        } else if granted.fourcc == FourCC::new(b"YUYV") {
            PixelOrder::Yuyv
        } else {
            return Err(CameraError::UnsupportedFormat(granted.fourcc.to_string()));
        };

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(open_err)?;

        info!(
            "Opened /dev/video{}: {}x{} {}",
            config.device, granted.width, granted.height, granted.fourcc
        );

        Ok(Self {
            stream,
            device,
            width: granted.width,
            height: granted.height,
            order,
        })
    }
}

impl Camera for V4lCamera {
    fn read(&mut self) -> Result<Option<RawFrame>, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::Read(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(None);
        }
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            order: self.order,
            data: buf[..used].to_vec(),
        }))
    }

    fn describe(&self) -> String {
        let name = self
            .device
            .query_caps()
            .map(|c| c.card)
            .unwrap_or_else(|_| "v4l2 device".to_string());
        format!("{} {}x{} {:?}", name, self.width, self.height, self.order)
    }
}
