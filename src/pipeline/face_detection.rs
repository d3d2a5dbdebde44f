use image::DynamicImage;
use ndarray::{ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::inference::Inference;
use crate::pipeline::config::FaceDetectionConfig;
use crate::pipeline::decode::{decode_stride, DecodeParams, Proposal, Proposals};
use crate::pipeline::net_outputs::bind_outputs;
use crate::processing::bbox_transform::ClipWindow;
use crate::processing::coordinate::{map_box, map_landmarks};
use crate::processing::nms::nms;
use crate::processing::preprocess::preprocess;
use crate::rcnn::anchors::AnchorSet;
use crate::utils::utils::image_to_array;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

impl From<[f32; 2]> for Coordinate2D {
    fn from(p: [f32; 2]) -> Self {
        Coordinate2D { x: p[0], y: p[1] }
    }
}

/// The five facial keypoints, in the order the network predicts them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmark {
    pub right_eye: Coordinate2D,
    pub left_eye: Coordinate2D,
    pub nose: Coordinate2D,
    pub mouth_right: Coordinate2D,
    pub mouth_left: Coordinate2D,
}

impl FaceLandmark {
    pub fn points(&self) -> [Coordinate2D; 5] {
        [self.right_eye, self.left_eye, self.nose, self.mouth_right, self.mouth_left]
    }
}

/// A face in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub score: f32,
    /// `[x1, y1, x2, y2]`, truncated to whole pixels
    pub bounding_box: [i32; 4],
    pub landmarks: FaceLandmark,
}

impl From<Proposal> for Detection {
    fn from(p: Proposal) -> Self {
        let [x1, y1, x2, y2] = p.bbox;
        let [right_eye, left_eye, nose, mouth_right, mouth_left] = p.landmarks;
        Detection {
            score: p.score,
            bounding_box: [x1 as i32, y1 as i32, x2 as i32, y2 as i32],
            landmarks: FaceLandmark {
                right_eye: right_eye.into(),
                left_eye: left_eye.into(),
                nose: nose.into(),
                mouth_right: mouth_right.into(),
                mouth_left: mouth_left.into(),
            },
        }
    }
}

/// RetinaFace decoding engine.
///
/// Owns the validated configuration and the anchor set, both immutable after
/// construction, so one engine can serve any number of `detect` calls.
#[derive(Debug, Clone)]
pub struct RetinaFaceDetection {
    config: FaceDetectionConfig,
    anchors: AnchorSet,
}

impl RetinaFaceDetection {
    pub fn new(config: FaceDetectionConfig) -> Result<Self> {
        config.validate()?;
        let anchors = AnchorSet::new(&config.anchor_cfg)?;
        info!(
            "retinaface engine ready: input {}x{}, score >= {}, nms {}",
            config.image_size.0, config.image_size.1, config.score_threshold, config.nms_threshold
        );
        Ok(RetinaFaceDetection { config, anchors })
    }

    pub fn config(&self) -> &FaceDetectionConfig {
        &self.config
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    fn decode_params(&self, clip_window: ClipWindow) -> DecodeParams {
        DecodeParams {
            score_threshold: self.config.score_threshold,
            bbox_stds: self.config.bbox_stds,
            landmark_std: self.config.landmark_std,
            clip_window,
        }
    }

    /// detect runs one `(H, W, 3)` image through preprocessing, `model` and
    /// decoding. Detections come back in NMS keep order, highest score first.
    pub fn detect<I: Inference + ?Sized>(&self, image: ArrayView3<u8>, model: &I) -> Result<Vec<Detection>> {
        let preprocessed = preprocess(
            image,
            self.config.image_size,
            self.config.allow_upscaling,
            &self.config.normalization(),
        )?;

        let net_out = model.infer(preprocessed.tensor.view())?;
        let outputs = bind_outputs(net_out, &self.anchors, preprocessed.tensor_shape)?;

        let params = self.decode_params(preprocessed.content_window());
        let mut per_stride = Vec::with_capacity(3);
        for (stride, anchors) in self.anchors.iter() {
            per_stride.push(decode_stride(outputs.get(stride), anchors, &params)?);
        }
        let proposals = Proposals::concatenate(&per_stride);
        if proposals.is_empty() {
            debug!("no proposals above {}", self.config.score_threshold);
            return Ok(Vec::new());
        }

        let proposals = proposals.select(&proposals.order_by_score());
        let keep = nms(proposals.detections().view(), self.config.nms_threshold);
        let mut kept = proposals.select(&keep);
        info!("{} proposals, {} after nms", proposals.len(), kept.len());

        for i in 0..kept.len() {
            map_box(kept.boxes.row_mut(i), preprocessed.axis_scale, preprocessed.offset);
            map_landmarks(
                kept.landmarks.index_axis_mut(Axis(0), i),
                preprocessed.axis_scale,
                preprocessed.offset,
            );
        }

        Ok(kept.iter().map(Detection::from).collect())
    }

    /// detect_image converts `img` to 8-bit RGB and runs `detect` on it.
    pub fn detect_image<I: Inference + ?Sized>(&self, img: &DynamicImage, model: &I) -> Result<Vec<Detection>> {
        let rgb = img.to_rgb8();
        let pixels = image_to_array(&rgb);
        self.detect(pixels.view(), model)
    }
}

/// detect_faces is a one-shot `RetinaFaceDetection::new(config).detect(..)`.
pub fn detect_faces<I: Inference + ?Sized>(
    image: ArrayView3<u8>,
    model: &I,
    config: &FaceDetectionConfig,
) -> Result<Vec<Detection>> {
    RetinaFaceDetection::new(config.clone())?.detect(image, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectionError;
    use crate::inference::NpyReplay;
    use crate::rcnn::stride::FeatureStride;
    use ndarray::{Array3, ArrayD, ArrayView4, IxDyn};

    /// zero_outputs builds all-zero network outputs for a `height x width` input.
    fn zero_outputs(height: usize, width: usize) -> Vec<ArrayD<f32>> {
        let mut out = Vec::new();
        for stride in FeatureStride::ALL {
            let (h, w) = ((height + stride.value() - 1) / stride.value(), (width + stride.value() - 1) / stride.value());
            for c in [4, 8, 20] {
                out.push(ArrayD::zeros(IxDyn(&[1, h, w, c])));
            }
        }
        out
    }

    fn failing_model(_input: ArrayView4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
        anyhow::bail!("runtime unavailable")
    }

    #[test]
    fn test_all_zero_scores_give_no_detections() {
        let image = Array3::<u8>::zeros((480, 640, 3));
        let engine = RetinaFaceDetection::new(FaceDetectionConfig::new()).unwrap();
        let model = NpyReplay::new(zero_outputs(1024, 1024));
        assert_eq!(engine.detect(image.view(), &model).unwrap(), vec![]);
    }

    #[test]
    fn test_single_anchor_end_to_end() {
        let image = Array3::<u8>::from_elem((32, 32, 3), 128);
        let config = FaceDetectionConfig::new().with_image_size(32, 32);
        let mut outputs = zero_outputs(32, 32);
        // stride 8 scores, cell (1, 1), foreground of base anchor 0
        outputs[6][[0, 1, 1, 2]] = 0.95;

        let detections = detect_faces(image.view(), &NpyReplay::new(outputs), &config).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.score, 0.95);
        assert_eq!(det.bounding_box, [0, 0, 31, 31]);
        for point in det.landmarks.points() {
            assert_eq!(point, Coordinate2D { x: 15.5, y: 15.5 });
        }
    }

    #[test]
    fn test_maps_back_through_padding() {
        // 16x32 image into a 64x64 input: scale 2, content rows 16..48
        let image = Array3::<u8>::zeros((16, 32, 3));
        let config = FaceDetectionConfig::new().with_image_size(64, 64);
        let mut outputs = zero_outputs(64, 64);
        // stride 8, cell (row 3, col 2), base anchor 1 = [16, 24, 31, 39]
        outputs[6][[0, 3, 2, 3]] = 0.99;

        let detections = detect_faces(image.view(), &NpyReplay::new(outputs), &config).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounding_box, [8, 4, 15, 11]);
        assert_eq!(detections[0].landmarks.nose, Coordinate2D { x: 11.75, y: 7.75 });
    }

    #[test]
    fn test_padding_proposals_stay_inside_the_image() {
        // 40x80 image into a 64x64 input: scale 0.8, content rows 16..=47
        let image = Array3::<u8>::zeros((40, 80, 3));
        let config = FaceDetectionConfig::new().with_image_size(64, 64);
        let mut outputs = zero_outputs(64, 64);
        // stride 8, cell (row 0, col 3), base anchor 1 = [24, 0, 39, 15], all padding
        outputs[6][[0, 0, 3, 3]] = 0.99;

        let detections = detect_faces(image.view(), &NpyReplay::new(outputs), &config).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounding_box, [30, 0, 48, 0]);
    }

    #[test]
    fn test_duplicates_are_suppressed() {
        let image = Array3::<u8>::zeros((32, 32, 3));
        let config = FaceDetectionConfig::new().with_image_size(32, 32);
        let mut outputs = zero_outputs(32, 32);
        // two stride 8 anchors of the same size one cell apart overlap heavily
        outputs[6][[0, 1, 1, 2]] = 0.95;
        outputs[6][[0, 1, 2, 2]] = 0.92;
        // a small anchor in the opposite corner survives
        outputs[6][[0, 3, 3, 3]] = 0.91;

        let detections = detect_faces(image.view(), &NpyReplay::new(outputs), &config).unwrap();
        let scores: Vec<f32> = detections.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.95, 0.91]);
    }

    #[test]
    fn test_contract_violations() {
        let image = Array3::<u8>::zeros((32, 32, 3));
        let engine = RetinaFaceDetection::new(FaceDetectionConfig::new().with_image_size(32, 32)).unwrap();

        let mut outputs = zero_outputs(32, 32);
        outputs.pop();
        let err = engine.detect(image.view(), &NpyReplay::new(outputs)).unwrap_err();
        assert!(matches!(err, DetectionError::InferenceContract(_)));

        let mut outputs = zero_outputs(32, 32);
        outputs[1] = ArrayD::zeros(IxDyn(&[1, 1, 1, 6]));
        let err = engine.detect(image.view(), &NpyReplay::new(outputs)).unwrap_err();
        assert!(matches!(err, DetectionError::InferenceContract(_)));
    }

    #[test]
    fn test_inference_failure_is_propagated() {
        let image = Array3::<u8>::zeros((32, 32, 3));
        let engine = RetinaFaceDetection::new(FaceDetectionConfig::new().with_image_size(32, 32)).unwrap();
        let err = engine.detect(image.view(), &failing_model).unwrap_err();
        assert!(matches!(err, DetectionError::Inference(_)));
        assert_eq!(err.to_string(), "runtime unavailable");
    }

    #[test]
    fn test_invalid_inputs() {
        let model = NpyReplay::new(zero_outputs(32, 32));
        let config = FaceDetectionConfig::new().with_image_size(32, 32);

        let gray = Array3::<u8>::zeros((32, 32, 1));
        assert!(matches!(
            detect_faces(gray.view(), &model, &config),
            Err(DetectionError::InvalidImage(_))
        ));

        let image = Array3::<u8>::zeros((32, 32, 3));
        let bad = config.clone().with_nms_threshold(1.2);
        assert!(matches!(
            detect_faces(image.view(), &model, &bad),
            Err(DetectionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_detect_image_converts_to_rgb() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::new(32, 32));
        let engine = RetinaFaceDetection::new(FaceDetectionConfig::new().with_image_size(32, 32)).unwrap();
        let detections = engine.detect_image(&img, &NpyReplay::new(zero_outputs(32, 32))).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_detection_json_shape() {
        let p = Proposal {
            bbox: [1.9, 2.5, 30.2, 40.7],
            score: 0.5,
            landmarks: [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0], [9.0, 10.0]],
            stride: 8,
        };
        let det = Detection::from(p);
        assert_eq!(det.bounding_box, [1, 2, 30, 40]);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["bounding_box"], serde_json::json!([1, 2, 30, 40]));
        assert_eq!(json["landmarks"]["left_eye"]["x"], serde_json::json!(3.0));
        assert_eq!(json["landmarks"]["mouth_left"]["y"], serde_json::json!(10.0));
    }
}
