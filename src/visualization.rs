use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use cv2::prelude::*;
use ndarray as nd;
use opencv as cv2;
use rerun::{RecordingStream, RecordingStreamBuilder};

use crate::image::Image;
use crate::mesh::Mesh;
use crate::my_types::*;
use crate::preprocess::Channels;
use crate::track::{TrackState, TrackedMesh};

/// Everything a renderer may look at after one frame was tracked.
pub struct RenderInput<'a> {
    pub frame_index: usize,
    /// Original BGR frame, absent when tracking ran on bare channels
    pub frame: Option<&'a cv2::core::Mat>,
    pub channels: &'a Channels,
    pub vertices: &'a [Vector2d],
    pub split: &'a [Mesh],
    pub tracked: &'a [TrackedMesh],
}

/// Observes the tracker. Nothing it returns feeds back into tracking.
pub trait RenderSink: Send {
    fn render(&mut self, input: &RenderInput) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _input: &RenderInput) -> Result<()> {
        Ok(())
    }
}

trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for cv2::core::Mat {
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        let bytes = self.data_bytes()?;
        let size = self.size()?;
        let a = nd::ArrayView3::from_shape((size.height as usize, size.width as usize, 3), bytes)?;
        Ok(a.to_owned())
    }
}

fn image_as_array(image: &Image) -> Result<nd::Array2<u8>> {
    Ok(nd::Array2::from_shape_vec(
        (image.height, image.width),
        image.data.clone(),
    )?)
}

fn to_f32(p: &Vector2d) -> [f32; 2] {
    [p.x as f32, p.y as f32]
}

/// Writes every frame into a rerun recording
pub struct RerunSink {
    recorder: RecordingStream,
}

impl RerunSink {
    pub fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let recorder = RecordingStreamBuilder::new("mesh_tracker")
            .save(path)
            .with_context(|| format!("Failed to create recording {}", path))?;
        Ok(Self { recorder })
    }
}

impl RenderSink for RerunSink {
    fn render(&mut self, input: &RenderInput) -> Result<()> {
        self.recorder
            .set_time_sequence("frame", input.frame_index as i64);

        if let Some(frame) = input.frame {
            let mut rgb = cv2::core::Mat::default();
            cv2::imgproc::cvt_color(frame, &mut rgb, cv2::imgproc::COLOR_BGR2RGB, 0)?;
            self.recorder
                .log("camera/frame", &rerun::Image::try_from(rgb.try_as_array()?)?)?;
        }
        self.recorder.log(
            "channels/structural",
            &rerun::Image::try_from(image_as_array(&input.channels.structural)?)?,
        )?;
        self.recorder.log(
            "channels/motion",
            &rerun::Image::try_from(image_as_array(&input.channels.motion)?)?,
        )?;

        self.recorder.log(
            "camera/vertices",
            &rerun::Points2D::new(input.vertices.iter().map(to_f32))
                .with_colors([rerun::Color::from_rgb(0, 0, 240)])
                .with_radii([1.5]),
        )?;

        let edges: Vec<[[f32; 2]; 2]> = input
            .split
            .iter()
            .flat_map(|mesh| {
                mesh.edges
                    .iter()
                    .map(|e| [to_f32(&mesh.points[e[0]]), to_f32(&mesh.points[e[1]])])
            })
            .collect();
        self.recorder.log(
            "camera/meshes",
            &rerun::LineStrips2D::new(edges).with_colors([rerun::Color::from_rgb(200, 100, 100)]),
        )?;

        let colors: Vec<rerun::Color> = input
            .tracked
            .iter()
            .map(|t| match t.state() {
                TrackState::Active => rerun::Color::from_rgb(0, 220, 0),
                TrackState::Absent(_) => rerun::Color::from_rgb(150, 150, 150),
            })
            .collect();
        let labels: Vec<String> = input
            .tracked
            .iter()
            .map(|t| format!("{} ({})", t.id, t.length_of_absence))
            .collect();
        self.recorder.log(
            "camera/tracks",
            &rerun::Points2D::new(input.tracked.iter().map(|t| to_f32(&t.centroid())))
                .with_colors(colors)
                .with_labels(labels)
                .with_radii([4.]),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_as_array_shape() {
        let image = Image::from_fn(4, 2, |x, y| (x + 4 * y) as u8);
        let a = image_as_array(&image).unwrap();
        assert_eq!(a.shape(), &[2, 4]);
        assert_eq!(a[[1, 3]], 7);
    }
}
