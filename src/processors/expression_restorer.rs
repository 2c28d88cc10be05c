//! Expression transfer (LivePortrait).
//!
//! Re-applies the expression of the original input frame ("source") onto
//! the current, possibly identity-swapped frame ("target"). Three
//! sub-models cooperate: a feature extractor over the target crop, a
//! motion extractor over both crops, and a generator that renders the
//! target under blended motion.

use ndarray::{Array2, Array3, Array5};

use crate::errors::Result;
use crate::face::helper::WarpTemplate;
use crate::face::FaceSelectorOptions;
use crate::inference::{SessionHandle, SessionKey, SessionRegistry, TensorOutput};
use crate::masks::{MaskComposer, MaskRequest};
use crate::models::names;
use crate::pipeline::FrameData;
use crate::vision::{tensor, warp, Frame};

use super::{selector_analysis, source_frame_of, FrameProcessor, ProcessorContext};

const CROP_SIZE: (u32, u32) = (512, 512);
const MOTION_POINTS: usize = 21;
/// Flat indices of the expression dimensions that carry pose rather than
/// expression; they are taken from the target so the head pose is not
/// dragged along with the transfer.
const POSE_INVARIANT_INDICES: [usize; 5] = [0, 4, 5, 8, 9];

/// Decoded motion-extractor output for one crop.
struct Motion {
    pitch: f32,
    yaw: f32,
    roll: f32,
    scale: f32,
    translation: [f32; 3],
    expression: Vec<f32>,
    points: Vec<f32>,
}

pub struct ExpressionRestorer {
    feature_extractor: SessionHandle,
    motion_extractor: SessionHandle,
    generator: SessionHandle,
    restore_factor: f32,
    composer: MaskComposer,
    mask_request: MaskRequest,
    selector: FaceSelectorOptions,
    analyser: std::sync::Arc<crate::face::FaceAnalyser>,
}

impl ExpressionRestorer {
    pub fn new(
        ctx: &ProcessorContext,
        restore_factor: f32,
        selector: FaceSelectorOptions,
    ) -> Result<Self> {
        let registry = SessionRegistry::global();
        let load = |name: &str| {
            registry.get_session(&SessionKey::new(ctx.repo.resolve(name)?, ctx.session.clone()))
        };
        Ok(Self {
            feature_extractor: load(names::FEATURE_EXTRACTOR)?,
            motion_extractor: load(names::MOTION_EXTRACTOR)?,
            generator: load(names::GENERATOR)?,
            restore_factor,
            composer: MaskComposer::box_only(),
            mask_request: MaskRequest::default(),
            selector,
            analyser: std::sync::Arc::clone(&ctx.analyser),
        })
    }

    fn crop_input(&self, session: &SessionHandle, crop: &Frame) -> ndarray::ArrayD<f32> {
        let (h, w) = session.input_hw(0).unwrap_or((256, 256));
        let resized = crop.resize(w as u32, h as u32);
        tensor::chw_input(&resized, [0.0; 3], [1.0; 3]).into_dyn()
    }

    fn extract_feature_volume(&self, crop: &Frame) -> Result<TensorOutput> {
        let input_name = self
            .feature_extractor
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let mut outputs = self
            .feature_extractor
            .run(vec![(input_name, self.crop_input(&self.feature_extractor, crop))])?;
        Ok(outputs.swap_remove(0))
    }

    fn extract_motion(&self, crop: &Frame) -> Result<Motion> {
        let input_name = self
            .motion_extractor
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let outputs = self
            .motion_extractor
            .run(vec![(input_name, self.crop_input(&self.motion_extractor, crop))])?;
        if outputs.len() < 7
            || outputs[4].data.len() < 3
            || outputs[5].data.len() < 63
            || outputs[6].data.len() < 63
        {
            return Err(crate::errors::VisageError::TensorShapeMismatch {
                context: "live_portrait_motion_extractor".into(),
                expected: "7 outputs (pitch, yaw, roll, scale, t, exp, points)".into(),
                actual: format!("{} outputs", outputs.len()),
            });
        }

        // outputs, in model order: pitch, yaw, roll, scale, translation(3),
        // expression(21x3), motion points(21x3)
        Ok(Motion {
            pitch: outputs[0].data[0],
            yaw: outputs[1].data[0],
            roll: outputs[2].data[0],
            scale: outputs[3].data[0],
            translation: [
                outputs[4].data[0],
                outputs[4].data[1],
                outputs[4].data[2],
            ],
            expression: outputs[5].data.clone(),
            points: outputs[6].data.clone(),
        })
    }

    fn restore_crop(&self, source_crop: &Frame, target_crop: &Frame) -> Result<Frame> {
        let feature_volume = self.extract_feature_volume(target_crop)?;
        let source_motion = self.extract_motion(source_crop)?;
        let target_motion = self.extract_motion(target_crop)?;

        let rotation = rotation_matrix(target_motion.pitch, target_motion.yaw, target_motion.roll);

        // expression blend: pose-invariant dimensions come from the target,
        // the rest lerp by the restore factor and clamp to the model's
        // per-coefficient envelope
        let mut source_expression = source_motion.expression.clone();
        for &index in &POSE_INVARIANT_INDICES {
            source_expression[index] = target_motion.expression[index];
        }
        let r = self.restore_factor;
        let mut blended = [0.0_f32; 63];
        for (i, out) in blended.iter_mut().enumerate() {
            let v = source_expression[i] * r + target_motion.expression[i] * (1.0 - r);
            *out = v.clamp(EXPRESSION_MIN[i], EXPRESSION_MAX[i]);
        }

        let source_points = transform_motion_points(&target_motion, &rotation, &blended);
        let target_points = transform_motion_points(
            &target_motion,
            &rotation,
            &target_motion.expression[..63],
        );

        self.generate(&feature_volume, &source_points, &target_points)
    }

    fn generate(
        &self,
        feature_volume: &TensorOutput,
        source_points: &Array2<f32>,
        target_points: &Array2<f32>,
    ) -> Result<Frame> {
        let volume = Array5::from_shape_vec(
            (1, 32, 16, 64, 64),
            feature_volume.data.clone(),
        )
        .map_err(|e| crate::errors::VisageError::TensorShapeMismatch {
            context: "live_portrait_generator".into(),
            expected: "[1, 32, 16, 64, 64]".into(),
            actual: e.to_string(),
        })?;

        let as_input = |points: &Array2<f32>| {
            let mut out = Array3::<f32>::zeros((1, MOTION_POINTS, 3));
            for i in 0..MOTION_POINTS {
                for j in 0..3 {
                    out[[0, i, j]] = points[[i, j]];
                }
            }
            out.into_dyn()
        };

        let outputs = self.generator.run(vec![
            ("feature_volume", volume.into_dyn()),
            ("source", as_input(source_points)),
            ("target", as_input(target_points)),
        ])?;

        let out = &outputs[0];
        let (h, w) = match out.shape.as_slice() {
            [_, _, h, w] => (*h as usize, *w as usize),
            _ => (CROP_SIZE.1 as usize, CROP_SIZE.0 as usize),
        };
        Ok(tensor::frame_from_chw_unit(&out.data, h, w))
    }
}

impl FrameProcessor for ExpressionRestorer {
    fn name(&self) -> &str {
        "expression_restorer"
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        let source_frame = source_frame_of(frame);
        let faces = self.analyser.get_faces(
            &frame.image,
            selector_analysis(&self.selector),
            &self.selector,
        )?;
        if faces.is_empty() {
            return Ok(());
        }

        let mut result = frame.image.clone();
        for face in &faces {
            if face.is_empty() {
                continue;
            }
            let landmark5 = face.landmark5_preferred();
            let template = WarpTemplate::Arcface128V2.points();

            let source_transform =
                warp::estimate_from_landmarks(landmark5.as_slice(), &template, CROP_SIZE);
            let source_crop = warp::warp_frame(
                &source_frame,
                source_transform,
                CROP_SIZE,
                warp::Border::Replicate,
            );
            let target_transform =
                warp::estimate_from_landmarks(landmark5.as_slice(), &template, CROP_SIZE);
            let target_crop =
                warp::warp_frame(&result, target_transform, CROP_SIZE, warp::Border::Replicate);

            let mask = self.composer.compose(&target_crop, &self.mask_request)?;
            let restored = self.restore_crop(&source_crop, &target_crop)?;
            let restored = restored.resize(CROP_SIZE.0, CROP_SIZE.1);

            result = warp::paste_back(&result, &restored, &mask, target_transform);
        }
        frame.image = result;
        Ok(())
    }
}

/// `R = Rz(roll) * Ry(yaw) * Rx(pitch)`, angles in degrees.
fn rotation_matrix(pitch: f32, yaw: f32, roll: f32) -> Array2<f32> {
    let (p, y, r) = (
        pitch.to_radians(),
        yaw.to_radians(),
        roll.to_radians(),
    );

    let rx = Array2::from_shape_vec(
        (3, 3),
        vec![
            1.0, 0.0, 0.0, //
            0.0, p.cos(), -p.sin(), //
            0.0, p.sin(), p.cos(),
        ],
    )
    .expect("static shape");
    let ry = Array2::from_shape_vec(
        (3, 3),
        vec![
            y.cos(), 0.0, y.sin(), //
            0.0, 1.0, 0.0, //
            -y.sin(), 0.0, y.cos(),
        ],
    )
    .expect("static shape");
    let rz = Array2::from_shape_vec(
        (3, 3),
        vec![
            r.cos(), -r.sin(), 0.0, //
            r.sin(), r.cos(), 0.0, //
            0.0, 0.0, 1.0,
        ],
    )
    .expect("static shape");

    rz.dot(&ry).dot(&rx)
}

/// `scale * (points . R^T + expression) + translation`, all 21x3.
fn transform_motion_points(
    motion: &Motion,
    rotation: &Array2<f32>,
    expression: &[f32],
) -> Array2<f32> {
    let points = Array2::from_shape_vec((MOTION_POINTS, 3), motion.points[..63].to_vec())
        .expect("motion point count checked at extraction");
    let expression = Array2::from_shape_vec((MOTION_POINTS, 3), expression[..63].to_vec())
        .expect("expression coefficient count checked at extraction");

    let mut out = points.dot(&rotation.t()) + &expression;
    out.mapv_inplace(|v| v * motion.scale);
    for i in 0..MOTION_POINTS {
        for j in 0..3 {
            out[[i, j]] += motion.translation[j];
        }
    }
    out
}

// Per-coefficient envelope of the 63 expression dimensions, measured from
// the model's training distribution. Bit-exact interop constants.
#[rustfmt::skip]
const EXPRESSION_MIN: [f32; 63] = [
    -2.880_671_25e-2, -8.127_313_11e-2, -1.705_411_59e-3,
    -4.885_986_82e-2, -3.321_966_16e-2, -1.674_314_99e-4,
    -6.754_250_82e-2, -4.286_817_46e-2, -1.989_508_16e-4,
    -7.231_039_55e-2, -3.285_033_26e-2, -7.313_247_19e-4,
    -3.870_736_44e-2, -6.015_464_66e-2, -5.502_699_64e-4,
    -6.380_487_23e-2, -2.238_407_28e-1, -7.132_618_34e-4,
    -3.027_107_01e-2, -3.931_954_50e-2, -8.240_865_10e-6,
    -2.957_998_59e-2, -5.393_188_82e-2, -1.742_196_04e-4,
    -2.923_595_16e-2, -1.530_509_44e-2, -6.304_608_54e-5,
    -5.564_938_77e-3, -2.343_446_02e-2, -1.268_582_42e-4,
    -4.375_930_13e-2, -2.777_682_99e-2, -2.705_036_85e-2,
    -1.769_266_46e-2, -1.916_765_42e-2, -1.150_908_21e-4,
    -8.342_683_32e-3, -3.997_755_70e-3, -3.274_812_48e-5,
    -3.401_628_88e-2, -2.818_689_68e-2, -1.966_795_24e-4,
    -2.918_554_10e-2, -3.975_111_62e-2, -2.812_306_78e-5,
    -1.503_957_25e-2, -2.494_945_94e-2, -9.425_735_33e-5,
    -1.679_387_69e-2, -2.009_539_31e-2, -4.007_506_07e-4,
    -1.864_356_18e-2, -2.485_351_64e-2, -2.744_164_32e-2,
    -4.612_111_95e-3, -1.216_607_91e-2, -2.931_730_41e-4,
    -4.100_170_73e-2, -7.438_240_20e-2, -4.427_629_71e-2,
    -1.903_709_96e-2, -3.743_633_63e-2, -1.347_403_88e-2,
];

#[rustfmt::skip]
const EXPRESSION_MAX: [f32; 63] = [
    4.466_829_45e-2, 7.087_729_13e-2, 4.083_442_04e-4,
    2.143_082_21e-2, 6.158_948_32e-2, 4.853_196_15e-5,
    3.023_637_83e-2, 4.450_432_96e-2, 1.282_987_25e-5,
    3.058_696_91e-2, 3.798_124_94e-2, 6.570_401_02e-4,
    4.456_705_23e-2, 3.972_592_20e-2, 7.109_667_64e-4,
    9.436_992_56e-2, 9.859_263_15e-2, 2.025_519_50e-4,
    1.611_313_97e-2, 2.929_061_28e-2, 3.447_334_17e-6,
    5.238_259_21e-2, 1.070_650_82e-1, 6.615_109_74e-4,
    2.857_186_83e-3, 8.323_201_91e-3, 2.393_146_13e-4,
    2.579_472_59e-2, 1.609_359_68e-2, 2.418_535_59e-5,
    4.908_332_23e-2, 3.439_030_80e-2, 3.223_533_56e-2,
    1.447_660_76e-2, 3.392_489_63e-2, 1.422_914_79e-4,
    8.757_490_43e-4, 6.822_126_45e-3, 2.760_970_53e-5,
    1.869_580_15e-2, 3.840_161_86e-2, 7.330_859_08e-5,
    2.017_141_13e-2, 4.905_442_15e-2, 2.340_289_21e-5,
    2.465_184_22e-2, 3.291_513_77e-2, 3.485_716_30e-5,
    2.224_575_91e-2, 1.217_965_41e-2, 1.563_965_93e-4,
    1.721_096_23e-2, 3.016_269_58e-2, 1.365_568_77e-2,
    1.834_602_84e-2, 1.611_419_58e-2, 2.874_401_69e-4,
    3.575_941_55e-2, 1.805_546_88e-1, 2.755_541_54e-2,
    2.174_509_50e-2, 8.668_112_01e-2, 3.342_417_26e-2,
];
