//! AVIF input support.
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e);
//! decoding would need `"avif-native"`, which links the C library dav1d.
//! Instead the AV1 payload is pulled out of the container with `avif-parse`
//! and decoded by `rav1d`, the pure Rust port of dav1d.

use super::backend::{BackendError, Dimensions};
use image::DynamicImage;
use rav1d::include::dav1d::data::Dav1dData;
use rav1d::include::dav1d::dav1d::Dav1dSettings;
use rav1d::include::dav1d::headers::{
    DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
    DAV1D_PIXEL_LAYOUT_I444,
};
use rav1d::include::dav1d::picture::Dav1dPicture;
use rav1d::src::lib as dav1d;
use std::io::Cursor;
use std::ptr::NonNull;

fn is_avif_brand(brand: &[u8]) -> bool {
    matches!(brand, b"avif" | b"avis")
}

/// Sniff the ISO-BMFF `ftyp` box for an AVIF brand.
///
/// Writers may use a generic major brand (`mif1`, `msf1`, `miaf`) and list
/// `avif` only among the compatible brands, so those are scanned too.
pub fn is_avif(source: &[u8]) -> bool {
    if source.len() < 12 || &source[4..8] != b"ftyp" {
        return false;
    }
    if is_avif_brand(&source[8..12]) {
        return true;
    }
    // size 0 means the box runs to the end of the data.
    let size = u32::from_be_bytes([source[0], source[1], source[2], source[3]]) as usize;
    let end = if size == 0 { source.len() } else { size.min(source.len()) };
    // major brand, minor version, then compatible brands.
    source
        .get(16..end)
        .is_some_and(|brands| brands.chunks_exact(4).any(is_avif_brand))
}

fn parse(source: &[u8]) -> Result<avif_parse::AvifData, BackendError> {
    avif_parse::read_avif(&mut Cursor::new(source))
        .map_err(|e| BackendError::Decode(format!("invalid AVIF container: {e:?}")))
}

/// Dimensions from the container metadata (no AV1 decode).
pub fn identify(source: &[u8]) -> Result<Dimensions, BackendError> {
    let avif = parse(source)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Decode(format!("invalid AVIF metadata: {e:?}")))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

fn rav1d_error(step: &str, code: i32) -> BackendError {
    BackendError::Decode(format!("rav1d {step} failed ({code})"))
}

/// Decode the primary AVIF image to RGB8.
pub fn decode(source: &[u8]) -> Result<DynamicImage, BackendError> {
    let avif = parse(source)?;
    let av1_bytes: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe { dav1d::dav1d_default_settings(NonNull::new(settings.as_mut_ptr()).unwrap()) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(rav1d_error("open", rc.0));
    }

    // Every exit below goes through the single dav1d_close after this block.
    let decoded = (|| {
        let mut data = Dav1dData::default();
        let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
        if buf.is_null() {
            return Err(rav1d_error("data_create", -1));
        }
        unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf, av1_bytes.len()) };

        let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut data)) };
        if rc.0 != 0 {
            unsafe { dav1d::dav1d_data_unref(NonNull::new(&mut data)) };
            return Err(rav1d_error("send_data", rc.0));
        }

        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(rav1d_error("get_picture", rc.0));
        }
        let rgb = picture_to_rgb(&pic);
        unsafe { dav1d::dav1d_picture_unref(NonNull::new(&mut pic)) };
        rgb
    })();

    unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };

    let (width, height, rgb) = decoded?;
    image::RgbImage::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| BackendError::Decode("decoded AVIF buffer has the wrong size".into()))
}

/// Convert a decoded picture's planes to interleaved RGB8.
fn picture_to_rgb(pic: &Dav1dPicture) -> Result<(u32, u32, Vec<u8>), BackendError> {
    let width = pic.p.w as u32;
    let height = pic.p.h as u32;
    let layout = pic.p.layout;
    let plane = |i: usize| {
        pic.data[i]
            .map(|p| p.as_ptr() as *const u8)
            .ok_or_else(|| BackendError::Decode(format!("AVIF plane {i} missing")))
    };

    let y_ptr = plane(0)?;
    let planes = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        YuvPlanes {
            y_ptr,
            u_ptr: y_ptr,
            v_ptr: y_ptr,
            y_stride: pic.stride[0],
            uv_stride: 0,
            width,
            height,
            bpc: pic.p.bpc as u32,
            ss_x: false,
            ss_y: false,
            monochrome: true,
        }
    } else {
        let (ss_x, ss_y) = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            other => {
                return Err(BackendError::Decode(format!(
                    "unsupported AVIF pixel layout: {other}"
                )));
            }
        };
        YuvPlanes {
            y_ptr,
            u_ptr: plane(1)?,
            v_ptr: plane(2)?,
            y_stride: pic.stride[0],
            uv_stride: pic.stride[1],
            width,
            height,
            bpc: pic.p.bpc as u32,
            ss_x,
            ss_y,
            monochrome: false,
        }
    };
    Ok((width, height, planes.to_rgb()))
}

/// Borrowed YUV plane pointers from a live `Dav1dPicture`.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// BT.601 YCbCr → RGB, scaled to 8 bits.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;
        let clamp = |v: f32| (v * scale).clamp(0.0, 255.0) as u8;

        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for row in 0..self.height {
            for col in 0..self.width {
                let y = self.sample(self.y_ptr, self.y_stride, col, row);
                if self.monochrome {
                    let v = clamp(y);
                    rgb.extend_from_slice(&[v, v, v]);
                    continue;
                }
                let cx = if self.ss_x { col / 2 } else { col };
                let cy = if self.ss_y { row / 2 } else { row };
                let cb = self.sample(self.u_ptr, self.uv_stride, cx, cy) - center;
                let cr = self.sample(self.v_ptr, self.uv_stride, cx, cy) - center;
                rgb.extend_from_slice(&[
                    clamp(y + 1.402 * cr),
                    clamp(y - 0.344136 * cb - 0.714136 * cr),
                    clamp(y + 1.772 * cb),
                ]);
            }
        }
        rgb
    }

    /// One sample from a plane; 10/12-bit content is stored as u16.
    #[inline]
    fn sample(&self, ptr: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        if self.bpc <= 8 {
            (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
        } else {
            let offset = y as isize * stride + x as isize * 2;
            (unsafe { (ptr.offset(offset) as *const u16).read_unaligned() }) as f32
        }
    }
}
