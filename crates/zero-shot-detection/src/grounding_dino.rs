//! Grounding DINO exported to ONNX
//!
//! Inputs: `pixel_values [1,3,H,W]`, `input_ids`, `token_type_ids`,
//! `attention_mask` (all `[1,L]`) and `pixel_mask [1,H,W]`.
//! Outputs: `logits [1,Q,T]` (per query, per text token) and
//! `pred_boxes [1,Q,4]` as normalized `cx, cy, w, h`.

use crate::session::create_session;
use crate::{RawDetections, ZeroShotConfig, ZeroShotError, ZeroShotModel};
use image::RgbImage;
use ndarray::{Array2, Array3, Array4};
use ort::session::Session;
use ort::value::Tensor;
use std::ops::Range;
use tokenizers::Tokenizer;
use tracing::{debug, info};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Grounding DINO session plus its text tokenizer
pub struct GroundingDinoModel {
    session: Session,
    tokenizer: Tokenizer,
    max_short_side: u32,
    max_long_side: u32,
}

impl GroundingDinoModel {
    /// Load the ONNX model and tokenizer named in `config`
    pub fn load(config: &ZeroShotConfig) -> Result<Self, ZeroShotError> {
        info!(
            "Loading Grounding DINO from {} (tokenizer {})",
            config.model_path.display(),
            config.tokenizer_path.display()
        );

        let session = create_session(&config.model_path)?;
        let tokenizer = Tokenizer::from_file(&config.tokenizer_path).map_err(|e| {
            ZeroShotError::Tokenizer(format!("{}: {e}", config.tokenizer_path.display()))
        })?;

        info!("Grounding DINO ready");

        Ok(Self {
            session,
            tokenizer,
            max_short_side: config.max_short_side,
            max_long_side: config.max_long_side,
        })
    }
}

impl ZeroShotModel for GroundingDinoModel {
    fn predict(
        &mut self,
        image: &RgbImage,
        phrases: &[&str],
        box_threshold: f32,
        text_threshold: f32,
    ) -> Result<RawDetections, ZeroShotError> {
        let prompt = build_prompt(phrases);
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| ZeroShotError::Tokenizer(e.to_string()))?;

        let spans = phrase_token_spans(
            &prompt,
            phrases,
            encoding.get_offsets(),
            encoding.get_special_tokens_mask(),
        );

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&t| i64::from(t)).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| i64::from(m))
            .collect();
        let seq_len = ids.len();

        let pixel_values = preprocess(image, self.max_short_side, self.max_long_side);
        let (_, _, input_h, input_w) = pixel_values.dim();
        debug!(
            "Grounding DINO input {}x{} -> {}x{}, {} text tokens",
            image.width(),
            image.height(),
            input_w,
            input_h,
            seq_len
        );

        let input_ids = Array2::from_shape_vec((1, seq_len), ids)
            .map_err(|e| ZeroShotError::Inference(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), mask)
            .map_err(|e| ZeroShotError::Inference(e.to_string()))?;
        let token_type_ids = Array2::<i64>::zeros((1, seq_len));
        let pixel_mask = Array3::<i64>::ones((1, input_h, input_w));

        let inference = |e: ort::Error| ZeroShotError::Inference(e.to_string());
        let pixel_values = Tensor::from_array(pixel_values).map_err(inference)?;
        let input_ids = Tensor::from_array(input_ids).map_err(inference)?;
        let token_type_ids = Tensor::from_array(token_type_ids).map_err(inference)?;
        let attention_mask = Tensor::from_array(attention_mask).map_err(inference)?;
        let pixel_mask = Tensor::from_array(pixel_mask).map_err(inference)?;

        let (logits, num_queries, num_text, boxes) = {
            let outputs = self
                .session
                .run(ort::inputs![
                    "pixel_values" => pixel_values,
                    "input_ids" => input_ids,
                    "token_type_ids" => token_type_ids,
                    "attention_mask" => attention_mask,
                    "pixel_mask" => pixel_mask,
                ])
                .map_err(inference)?;

            let (logits_shape, logits) = outputs["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| ZeroShotError::Inference(format!("logits: {e}")))?;
            let logit_dims: Vec<i64> = logits_shape.iter().copied().collect();
            if logit_dims.len() != 3 {
                return Err(ZeroShotError::InvalidOutput(format!(
                    "expected 3D logits, got {logit_dims:?}"
                )));
            }

            let (_, boxes) = outputs["pred_boxes"]
                .try_extract_tensor::<f32>()
                .map_err(|e| ZeroShotError::Inference(format!("pred_boxes: {e}")))?;

            (
                logits.to_vec(),
                logit_dims[1] as usize,
                logit_dims[2] as usize,
                boxes.to_vec(),
            )
        };

        let tensors = OutputTensors {
            logits: &logits,
            boxes: &boxes,
            num_queries,
            num_text,
            seq_len,
        };
        tensors.decode(
            &spans,
            phrases,
            (box_threshold, text_threshold),
            (image.width(), image.height()),
        )
    }
}

/// Prompt text: lowercase phrases joined as `"a. b. c."`
#[must_use]
pub fn build_prompt(phrases: &[&str]) -> String {
    let mut prompt = phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(". ");
    prompt.push('.');
    prompt
}

/// Token indices belonging to each phrase of the prompt
///
/// `offsets` are byte offsets into `prompt`; special tokens are skipped.
#[must_use]
pub fn phrase_token_spans(
    prompt: &str,
    phrases: &[&str],
    offsets: &[(usize, usize)],
    special_tokens_mask: &[u32],
) -> Vec<Vec<usize>> {
    let mut cursor = 0;
    let ranges: Vec<Option<Range<usize>>> = phrases
        .iter()
        .map(|phrase| {
            let needle = phrase.trim().to_lowercase();
            let start = cursor + prompt.get(cursor..)?.find(&needle)?;
            let end = start + needle.len();
            cursor = end;
            Some(start..end)
        })
        .collect();

    ranges
        .iter()
        .map(|range| {
            let Some(range) = range else {
                return Vec::new();
            };
            offsets
                .iter()
                .enumerate()
                .filter(|&(i, &(s, e))| {
                    special_tokens_mask.get(i).copied().unwrap_or(0) == 0
                        && e > s
                        && s >= range.start
                        && e <= range.end
                })
                .map(|(i, _)| i)
                .collect()
        })
        .collect()
}

/// Resized `(width, height)`: short side to `short`, long side capped at `long`
#[must_use]
pub fn resized_dims(width: u32, height: u32, short: u32, long: u32) -> (u32, u32) {
    let (w, h) = (width as f32, height as f32);
    let mut scale = short as f32 / w.min(h).max(1.0);
    if w.max(h) * scale > long as f32 {
        scale = long as f32 / w.max(h);
    }
    (
        (w * scale).round().max(1.0) as u32,
        (h * scale).round().max(1.0) as u32,
    )
}

/// Resize and normalize to `[1, 3, H, W]` with ImageNet statistics
#[must_use]
pub fn preprocess(image: &RgbImage, short: u32, long: u32) -> Array4<f32> {
    let (w, h) = resized_dims(image.width(), image.height(), short, long);
    let resized = image::imageops::resize(image, w, h, image::imageops::FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (f32::from(pixel[c]) / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Flattened model outputs for a single image
pub struct OutputTensors<'a> {
    /// `[Q * T]` raw logits
    pub logits: &'a [f32],
    /// `[Q * 4]` normalized `cx, cy, w, h`
    pub boxes: &'a [f32],
    pub num_queries: usize,
    pub num_text: usize,
    /// Real (unpadded) text length
    pub seq_len: usize,
}

impl OutputTensors<'_> {
    /// Threshold queries and map them to pixel boxes and phrases
    ///
    /// A query is kept when its best token probability exceeds the box
    /// threshold. Its label is the phrase holding the highest token
    /// probability above the text threshold, or empty when none does.
    pub fn decode(
        &self,
        spans: &[Vec<usize>],
        phrases: &[&str],
        (box_threshold, text_threshold): (f32, f32),
        (image_width, image_height): (u32, u32),
    ) -> Result<RawDetections, ZeroShotError> {
        if self.logits.len() < self.num_queries * self.num_text
            || self.boxes.len() < self.num_queries * 4
        {
            return Err(ZeroShotError::InvalidOutput(format!(
                "output tensors too small for {} queries x {} tokens",
                self.num_queries, self.num_text
            )));
        }

        let valid_tokens = self.seq_len.min(self.num_text);
        let (img_w, img_h) = (image_width as f32, image_height as f32);
        let mut raw = RawDetections::default();

        for q in 0..self.num_queries {
            let row = &self.logits[q * self.num_text..q * self.num_text + valid_tokens];
            let probs: Vec<f32> = row.iter().map(|&l| sigmoid(l)).collect();
            let score = probs.iter().copied().fold(0.0f32, f32::max);
            if score <= box_threshold {
                continue;
            }

            let label = spans
                .iter()
                .zip(phrases)
                .filter_map(|(span, phrase)| {
                    let best = span
                        .iter()
                        .filter_map(|&t| probs.get(t).copied())
                        .fold(0.0f32, f32::max);
                    (best > text_threshold).then_some((best, *phrase))
                })
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, phrase)| phrase.to_string())
                .unwrap_or_default();

            let b = &self.boxes[q * 4..q * 4 + 4];
            let (cx, cy, bw, bh) = (b[0], b[1], b[2], b[3]);
            raw.boxes.push([
                (cx - bw / 2.0) * img_w,
                (cy - bh / 2.0) * img_h,
                (cx + bw / 2.0) * img_w,
                (cy + bh / 2.0) * img_h,
            ]);
            raw.scores.push(score);
            raw.labels.push(label);
        }

        Ok(raw)
    }
}
