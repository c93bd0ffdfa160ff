use cv2::prelude::*;
use opencv as cv2;

use cv2::core::{self, Mat, Size, Vector};
use cv2::imgproc;

use crate::error::{TrackError, TrackResult};
use crate::image::Image;

const HUE_BINS: i32 = 16;
const HUE_RANGE: [f32; 2] = [0., 180.];

/// The two single-channel views the corner detector runs on.
#[derive(Clone, Debug)]
pub struct Channels {
    /// Hue derived, coarse region boundaries
    pub structural: Image,
    /// Value (brightness), fine texture
    pub motion: Image,
}

/// Split a BGR frame into the structural and motion channels.
///
/// The frame is converted to HSV and lightly blurred. The structural channel
/// is the hue (or its histogram back projection) stretched to 0..255 and
/// median filtered; the motion channel is the value plane.
pub fn preprocess(frame: &Mat, back_projection: bool) -> TrackResult<Channels> {
    let mut hsv = Mat::default();
    imgproc::cvt_color(frame, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        &hsv,
        &mut blurred,
        Size::new(3, 3),
        2.5,
        2.5,
        core::BORDER_REFLECT_101,
    )?;

    let mut planes = Vector::<Mat>::new();
    core::split(&blurred, &mut planes)?;
    let hue = planes.get(0)?;
    let value = planes.get(2)?;

    let hue = if back_projection {
        hue_back_projection(&hue)?
    } else {
        hue
    };

    let mut normalized = Mat::default();
    core::normalize(
        &hue,
        &mut normalized,
        0.,
        255.,
        core::NORM_MINMAX,
        -1,
        &Mat::default(),
    )?;
    let mut structural = Mat::default();
    imgproc::median_blur(&normalized, &mut structural, 9)?;

    Ok(Channels {
        structural: mat_to_image(&structural)?,
        motion: mat_to_image(&value)?,
    })
}

/// Likelihood of every pixel's hue under the frame's own hue histogram
fn hue_back_projection(hue: &Mat) -> TrackResult<Mat> {
    let mut images = Vector::<Mat>::new();
    images.push(hue.clone());
    let channels = Vector::<i32>::from_slice(&[0]);
    let hist_size = Vector::<i32>::from_slice(&[HUE_BINS]);
    let ranges = Vector::<f32>::from_slice(&HUE_RANGE);

    let mut hist = Mat::default();
    imgproc::calc_hist(
        &images,
        &channels,
        &Mat::default(),
        &mut hist,
        &hist_size,
        &ranges,
        false,
    )?;

    let mut normalized = Mat::default();
    core::normalize(
        &hist,
        &mut normalized,
        0.,
        255.,
        core::NORM_MINMAX,
        -1,
        &Mat::default(),
    )?;
    let mut smoothed = Mat::default();
    imgproc::gaussian_blur(
        &normalized,
        &mut smoothed,
        Size::new(3, 3),
        10.,
        10.,
        core::BORDER_REFLECT_101,
    )?;

    let mut projection = Mat::default();
    imgproc::calc_back_project(&images, &channels, &smoothed, &mut projection, &ranges, 1.)?;
    Ok(projection)
}

/// Copy a single-channel 8 bit mat into an [`Image`]
pub fn mat_to_image(mat: &Mat) -> TrackResult<Image> {
    let size = mat.size()?;
    let width = size.width as usize;
    let height = size.height as usize;
    let bytes = mat.data_bytes()?;
    if bytes.len() != width * height {
        return Err(TrackError::Precondition(format!(
            "expected a single-channel 8 bit image of {} x {}, got {} bytes",
            width,
            height,
            bytes.len()
        )));
    }
    Ok(Image {
        data: bytes.to_vec(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv2::core::{Rect, Scalar};

    fn red_square_frame() -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(48, 64, core::CV_8UC3, Scalar::all(0.)).unwrap();
        imgproc::rectangle(
            &mut frame,
            Rect::new(16, 12, 24, 20),
            Scalar::new(0., 0., 255., 0.),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        frame
    }

    #[test]
    fn test_channels_have_frame_size() {
        let channels = preprocess(&red_square_frame(), false).unwrap();
        assert_eq!((channels.motion.width, channels.motion.height), (64, 48));
        assert_eq!((channels.structural.width, channels.structural.height), (64, 48));
        // value plane is bright inside the square only
        assert!(channels.motion.value(28, 22) > 200);
        assert!(channels.motion.value(2, 2) < 10);
    }

    #[test]
    fn test_back_projection_keeps_size() {
        let channels = preprocess(&red_square_frame(), true).unwrap();
        assert_eq!((channels.structural.width, channels.structural.height), (64, 48));
    }

    #[test]
    fn test_mat_to_image_rejects_color() {
        let frame = red_square_frame();
        assert!(matches!(mat_to_image(&frame), Err(TrackError::Precondition(_))));

        let gray = Mat::new_rows_cols_with_default(3, 5, core::CV_8UC1, Scalar::all(7.)).unwrap();
        let image = mat_to_image(&gray).unwrap();
        assert_eq!((image.width, image.height), (5, 3));
        assert!(image.data.iter().all(|&v| v == 7));
    }
}
