use opencv::{
    core::{Mat, Size, CV_32FC3},
    imgproc,
    prelude::*,
};
use tch::{CModule, Device, IValue, Kind, Tensor};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::track::BBox;
use crate::utils;

/// COCO class id of "person"
pub const PERSON_CLASS: i64 = 0;

/// A single detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: i64) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Produces boxes for one frame. Implementations filter to the classes of
/// interest; the counter only looks at the box coordinates.
pub trait Detector<F> {
    fn detect(&mut self, frame: &F) -> Result<Vec<Detection>>;
}

/// YOLOv5 TorchScript model run through libtorch.
pub struct YoloV5Detector {
    model: CModule,
    device: Device,
    input_size: i64,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Allowed class ids
    pub classes: Vec<i64>,
}

impl YoloV5Detector {
    /// Load a TorchScript export on "cpu" or "cuda" (falls back to CPU).
    pub fn new(
        model_path: &str,
        device: &str,
        input_size: i32,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let device = if device.starts_with("cuda") && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let mut model = CModule::load_on_device(model_path, device)
            .map_err(|e| Error::Detector(format!("failed to load {}: {}", model_path, e)))?;
        model.set_eval();
        info!(model = model_path, ?device, input_size, "detector loaded");

        Ok(Self {
            model,
            device,
            input_size: i64::from(input_size),
            conf_threshold,
            nms_threshold,
            classes: vec![PERSON_CLASS],
        })
    }

    pub fn set_classes(&mut self, classes: Vec<i64>) {
        self.classes = classes;
    }

    /// Resize, BGR to RGB, scale to [0,1], NCHW.
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let side = self.input_size as i32;
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(side, side),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&resized, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32FC3, 1.0 / 255.0, 0.0)?;

        let data: Vec<f32> = float_mat
            .data_bytes()?
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let tensor = Tensor::from_slice(&data)
            .reshape([1, self.input_size, self.input_size, 3])
            .permute([0, 3, 1, 2])
            .to_kind(Kind::Float)
            .to_device(self.device);
        Ok(tensor)
    }

    fn inference(&self, input: Tensor) -> Result<Tensor> {
        let output = tch::no_grad(|| self.model.forward_is(&[IValue::Tensor(input)]))?;
        // exports return either the prediction tensor or a tuple led by it
        match output {
            IValue::Tensor(t) => Ok(t),
            IValue::Tuple(mut values) | IValue::GenericList(mut values) if !values.is_empty() => {
                match values.swap_remove(0) {
                    IValue::Tensor(t) => Ok(t),
                    other => Err(Error::Detector(format!("unexpected model output {:?}", other))),
                }
            }
            other => Err(Error::Detector(format!("unexpected model output {:?}", other))),
        }
    }

    /// Raw `[1, N, 5 + classes]` rows of (cx, cy, w, h, objectness, scores...)
    /// in input pixels, to frame-space detections after NMS.
    fn postprocess(&self, output: &Tensor, frame_w: f32, frame_h: f32) -> Result<Vec<Detection>> {
        let output = output.to_device(Device::Cpu).to_kind(Kind::Float).squeeze_dim(0);
        let (_rows, cols) = output.size2()?;
        if cols < 6 {
            return Err(Error::Detector(format!("unexpected output shape {:?}", output.size())));
        }
        let data = Vec::<f32>::try_from(output.contiguous().flatten(0, -1))?;

        let scale_w = frame_w / self.input_size as f32;
        let scale_h = frame_h / self.input_size as f32;

        let detections = decode_rows(&data, cols as usize, self.conf_threshold, &self.classes)
            .into_iter()
            .map(|d| {
                Detection::new(
                    BBox::new(
                        d.bbox.x1 * scale_w,
                        d.bbox.y1 * scale_h,
                        d.bbox.x2 * scale_w,
                        d.bbox.y2 * scale_h,
                    ),
                    d.confidence,
                    d.class_id,
                )
            })
            .collect::<Vec<_>>();

        Ok(suppress(detections, self.nms_threshold))
    }
}

impl Detector<Mat> for YoloV5Detector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let (frame_w, frame_h) = (frame.cols() as f32, frame.rows() as f32);
        let input = self.preprocess(frame)?;
        let output = self.inference(input)?;
        let detections = self.postprocess(&output, frame_w, frame_h)?;
        debug!(count = detections.len(), "detections");
        Ok(detections)
    }
}

/// Decode YOLO rows; confidence is objectness times the best class score.
fn decode_rows(data: &[f32], cols: usize, conf_threshold: f32, classes: &[i64]) -> Vec<Detection> {
    data.chunks_exact(cols)
        .filter_map(|row| {
            let (cx, cy, w, h, obj) = (row[0], row[1], row[2], row[3], row[4]);
            let (class_id, class_score) = row[5..]
                .iter()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });
            let class_id = class_id as i64;
            let confidence = obj * class_score;
            if confidence < conf_threshold || !classes.contains(&class_id) {
                return None;
            }
            Some(Detection::new(
                BBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
                confidence,
                class_id,
            ))
        })
        .collect()
}

fn suppress(detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    if detections.len() < 2 {
        return detections;
    }
    let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
    let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    utils::nms(&boxes, &scores, nms_threshold)
        .into_iter()
        .map(|i| detections[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One row with 3 class scores
    fn row(cx: f32, cy: f32, w: f32, h: f32, obj: f32, scores: [f32; 3]) -> Vec<f32> {
        let mut r = vec![cx, cy, w, h, obj];
        r.extend_from_slice(&scores);
        r
    }

    #[test]
    fn test_decode_filters_class_and_confidence() {
        let mut data = Vec::new();
        data.extend(row(100.0, 100.0, 20.0, 40.0, 0.9, [0.8, 0.1, 0.1])); // person
        data.extend(row(200.0, 100.0, 20.0, 40.0, 0.9, [0.1, 0.8, 0.1])); // other class
        data.extend(row(300.0, 100.0, 20.0, 40.0, 0.3, [0.9, 0.0, 0.0])); // too weak

        let dets = decode_rows(&data, 8, 0.35, &[PERSON_CLASS]);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        assert_relative_eq!(dets[0].confidence, 0.72, epsilon = 1e-6);
        assert_eq!(dets[0].bbox, BBox::new(90.0, 80.0, 110.0, 120.0));
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let dets = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 20.0), 0.5, 0),
            Detection::new(BBox::new(1.0, 0.0, 11.0, 20.0), 0.8, 0),
            Detection::new(BBox::new(100.0, 0.0, 110.0, 20.0), 0.4, 0),
        ];
        let kept = suppress(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].confidence, 0.8);
        assert_relative_eq!(kept[1].bbox.x1, 100.0);
    }

    #[test]
    fn test_detector_missing_model_is_error() {
        let result = YoloV5Detector::new("weights/does-not-exist.torchscript", "cpu", 640, 0.35, 0.45);
        assert!(matches!(result, Err(Error::Detector(_))));
    }
}
