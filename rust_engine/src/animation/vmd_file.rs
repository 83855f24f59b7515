//! VMD 文件读写
//!
//! 读取时把各段记录装入 `Motion`（批量 append，不调整曲线）；
//! 写出时只写登录帧。光照和阴影段读取时跳过，写出为空。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use encoding_rs::SHIFT_JIS;
use glam::{Quat, Vec3};

use crate::{MmdError, Result};

use super::bezier_curve::BezierCurve;
use super::index_set::FrameIndex;
use super::interpolation::{BoneCurveSet, CameraCurveSet, BONE_CURVE_BLOCK_LEN, CAMERA_CURVE_BLOCK_LEN};
use super::keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, Keyframe, MorphKeyframe};
use super::motion::Motion;
use super::motion_track::MotionTrack;

/// VMD 文件头（两个版本都是 25 字节，写出时用新版）
const VMD_HEADER_V1: &[u8] = b"Vocaloid Motion Data file";
const VMD_HEADER_V2: &[u8] = b"Vocaloid Motion Data 0002";
const HEADER_LEN: usize = 30;
/// 旧版模型名只有 10 字节
const MODEL_NAME_LEN_V1: usize = 10;
const MODEL_NAME_LEN: usize = 20;
const TRACK_NAME_LEN: usize = 15;
const IK_NAME_LEN: usize = 20;
const LIGHT_RECORD_LEN: u64 = 28;
const SHADOW_RECORD_LEN: u64 = 9;

/// VMD 文件数据
#[derive(Debug, Clone, Default)]
pub struct VmdFile {
    pub motion: Motion,
}

impl VmdFile {
    pub fn new(motion: Motion) -> Self {
        Self { motion }
    }

    /// 从文件路径加载 VMD
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        Self::load_from_reader(&mut reader)
    }

    /// 从字节切片加载 VMD
    pub fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = io::Cursor::new(bytes);
        Self::load_from_reader(&mut reader)
    }

    /// 从 Reader 加载 VMD
    pub fn load_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .map_err(|e| parse_error("header", e))?;

        let model_name_len = if header[..25] == VMD_HEADER_V2[..] {
            MODEL_NAME_LEN
        } else if header[..25] == VMD_HEADER_V1[..] {
            MODEL_NAME_LEN_V1
        } else {
            return Err(MmdError::VmdParse("Invalid VMD header".to_string()));
        };

        let mut model_name = vec![0u8; model_name_len];
        reader
            .read_exact(&mut model_name)
            .map_err(|e| parse_error("model name", e))?;
        let mut motion = Motion::new(decode_shift_jis(&model_name));

        let bone_count = read_count(reader, "bone keyframe count")?;
        for _ in 0..bone_count {
            let (name, keyframe) = read_bone_keyframe(reader)?;
            motion.bones.get(&name).append(keyframe);
        }

        let morph_count = read_count(reader, "morph keyframe count")?;
        for _ in 0..morph_count {
            let (name, keyframe) = read_morph_keyframe(reader)?;
            motion.morphs.get(&name).append(keyframe);
        }

        // 以下各段在较老的文件中可能不存在
        let mut camera_count = 0;
        let mut ik_count = 0;
        if let Some(count) = read_optional_count(reader)? {
            camera_count = count;
            for _ in 0..count {
                motion.camera.append(read_camera_keyframe(reader)?);
            }
            if let Some(count) = read_optional_count(reader)? {
                skip_records(reader, count, LIGHT_RECORD_LEN, "light")?;
                if let Some(count) = read_optional_count(reader)? {
                    skip_records(reader, count, SHADOW_RECORD_LEN, "shadow")?;
                    if let Some(count) = read_optional_count(reader)? {
                        ik_count = count;
                        for _ in 0..count {
                            for (name, keyframe) in read_ik_keyframes(reader)? {
                                motion.iks.get(&name).append(keyframe);
                            }
                        }
                    }
                }
            }
        }

        log::info!(
            "VMD 加载完成: 模型={}, 骨骼帧={}, Morph帧={}, 相机帧={}, IK帧={}",
            motion.model_name,
            bone_count,
            morph_count,
            camera_count,
            ik_count
        );

        Ok(Self { motion })
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// 编码为字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// 写出到 Writer（只写登录帧）
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let motion = &self.motion;
        writer.write_all(&pad(VMD_HEADER_V2, HEADER_LEN))?;
        writer.write_all(&encode_shift_jis(&motion.model_name, MODEL_NAME_LEN))?;

        let bones: Vec<(&str, &BoneKeyframe)> = registered(motion.bones.iter()).collect();
        writer.write_u32::<LittleEndian>(bones.len() as u32)?;
        for (name, keyframe) in &bones {
            write_bone_keyframe(writer, name, keyframe)?;
        }

        let morphs: Vec<(&str, &MorphKeyframe)> = registered(motion.morphs.iter()).collect();
        writer.write_u32::<LittleEndian>(morphs.len() as u32)?;
        for (name, keyframe) in &morphs {
            writer.write_all(&encode_shift_jis(name, TRACK_NAME_LEN))?;
            writer.write_u32::<LittleEndian>(vmd_frame(keyframe.index)?)?;
            writer.write_f32::<LittleEndian>(keyframe.weight)?;
        }

        let cameras: Vec<&CameraKeyframe> = motion.camera.iter().filter(|k| k.registered).collect();
        writer.write_u32::<LittleEndian>(cameras.len() as u32)?;
        for keyframe in &cameras {
            write_camera_keyframe(writer, keyframe)?;
        }

        // 光照、阴影
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;

        // IK 按帧分组，每帧一条记录
        let mut iks: BTreeMap<FrameIndex, Vec<(&str, &IkKeyframe)>> = BTreeMap::new();
        for (name, keyframe) in registered(motion.iks.iter()) {
            iks.entry(keyframe.index).or_default().push((name, keyframe));
        }
        writer.write_u32::<LittleEndian>(iks.len() as u32)?;
        for (index, entries) in &iks {
            let visible = entries.iter().any(|(_, keyframe)| keyframe.visible);
            writer.write_u32::<LittleEndian>(vmd_frame(*index)?)?;
            writer.write_u8(visible as u8)?;
            writer.write_u32::<LittleEndian>(entries.len() as u32)?;
            for (name, keyframe) in entries {
                writer.write_all(&encode_shift_jis(name, IK_NAME_LEN))?;
                writer.write_u8(keyframe.enabled as u8)?;
            }
        }

        log::info!(
            "VMD 写出完成: 模型={}, 骨骼帧={}, Morph帧={}, 相机帧={}, IK帧={}",
            motion.model_name,
            bones.len(),
            morphs.len(),
            cameras.len(),
            iks.len()
        );
        Ok(())
    }

    /// 获取最大帧数
    pub fn max_frame(&self) -> u32 {
        self.motion.max_frame()
    }

    pub fn into_motion(self) -> Motion {
        self.motion
    }
}

impl From<Motion> for VmdFile {
    fn from(motion: Motion) -> Self {
        Self::new(motion)
    }
}

/// 按名称展开所有登录帧
fn registered<'a, K: Keyframe + 'a>(
    tracks: impl Iterator<Item = (&'a str, &'a MotionTrack<K>)>,
) -> impl Iterator<Item = (&'a str, &'a K)> {
    tracks.flat_map(|(name, track)| {
        track
            .iter()
            .filter(|keyframe| keyframe.is_registered())
            .map(move |keyframe| (name, keyframe))
    })
}

/// VMD 只能存放非负整数帧
fn vmd_frame(index: FrameIndex) -> Result<u32> {
    if index.value() < 0.0 || !index.is_whole() {
        return Err(MmdError::Animation(format!(
            "Keyframe index {} cannot be stored in VMD",
            index
        )));
    }
    Ok(index.as_u32())
}

fn parse_error(what: &str, error: io::Error) -> MmdError {
    MmdError::VmdParse(format!("Failed to read {}: {}", what, error))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| parse_error(what, e))
}

/// 段落数量；文件在此处结束时返回 None
fn read_optional_count<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    match reader.read_u32::<LittleEndian>() {
        Ok(count) => Ok(Some(count)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(parse_error("section count", e)),
    }
}

fn skip_records<R: Read>(reader: &mut R, count: u32, record_len: u64, what: &str) -> Result<()> {
    let expected = count as u64 * record_len;
    let skipped = io::copy(&mut reader.by_ref().take(expected), &mut io::sink())?;
    if skipped != expected {
        return Err(MmdError::VmdParse(format!(
            "Truncated {} section: {} of {} bytes",
            what, skipped, expected
        )));
    }
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R, what: &str) -> Result<Vec3> {
    let mut values = [0f32; 3];
    reader
        .read_f32_into::<LittleEndian>(&mut values)
        .map_err(|e| parse_error(what, e))?;
    Ok(Vec3::from_array(values))
}

/// 读取骨骼关键帧
fn read_bone_keyframe<R: Read>(reader: &mut R) -> Result<(String, BoneKeyframe)> {
    let mut name = [0u8; TRACK_NAME_LEN];
    reader
        .read_exact(&mut name)
        .map_err(|e| parse_error("bone name", e))?;
    let frame = read_count(reader, "frame index")?;
    let position = read_vec3(reader, "translation")?;

    let mut rotation = [0f32; 4];
    reader
        .read_f32_into::<LittleEndian>(&mut rotation)
        .map_err(|e| parse_error("rotation", e))?;

    let mut block = [0u8; BONE_CURVE_BLOCK_LEN];
    reader
        .read_exact(&mut block)
        .map_err(|e| parse_error("interpolation", e))?;

    let mut keyframe = BoneKeyframe::new(frame, position, Quat::from_array(rotation))
        .with_curves(BoneCurveSet::from_bytes(&block));
    keyframe.disable_physics = BoneCurveSet::is_physics_disabled(&block);

    Ok((decode_shift_jis(&name), keyframe))
}

fn write_bone_keyframe<W: Write>(writer: &mut W, name: &str, keyframe: &BoneKeyframe) -> Result<()> {
    writer.write_all(&encode_shift_jis(name, TRACK_NAME_LEN))?;
    writer.write_u32::<LittleEndian>(vmd_frame(keyframe.index)?)?;
    for value in keyframe.position_or_zero().to_array() {
        writer.write_f32::<LittleEndian>(value)?;
    }
    for value in keyframe.rotation_or_identity().to_array() {
        writer.write_f32::<LittleEndian>(value)?;
    }
    let block = match &keyframe.curves {
        Some(curves) => curves.to_bytes(keyframe.disable_physics),
        None => {
            let linear = BezierCurve::linear();
            BoneCurveSet::new(linear, linear, linear, linear).to_bytes(keyframe.disable_physics)
        }
    };
    writer.write_all(&block)?;
    Ok(())
}

/// 读取 Morph 关键帧
fn read_morph_keyframe<R: Read>(reader: &mut R) -> Result<(String, MorphKeyframe)> {
    let mut name = [0u8; TRACK_NAME_LEN];
    reader
        .read_exact(&mut name)
        .map_err(|e| parse_error("morph name", e))?;
    let frame = read_count(reader, "frame index")?;
    let weight = reader
        .read_f32::<LittleEndian>()
        .map_err(|e| parse_error("weight", e))?;
    Ok((decode_shift_jis(&name), MorphKeyframe::new(frame, weight)))
}

/// 读取相机关键帧
///
/// 61 字节：帧索引、距离、注视点、欧拉角、24 字节插值、视角 (u32)、
/// 透视标志（0 为透视）
fn read_camera_keyframe<R: Read>(reader: &mut R) -> Result<CameraKeyframe> {
    let frame = read_count(reader, "camera frame index")?;
    let distance = reader
        .read_f32::<LittleEndian>()
        .map_err(|e| parse_error("camera distance", e))?;
    let position = read_vec3(reader, "camera look_at")?;
    let rotation = read_vec3(reader, "camera angle")?;

    let mut block = [0u8; CAMERA_CURVE_BLOCK_LEN];
    reader
        .read_exact(&mut block)
        .map_err(|e| parse_error("camera interpolation", e))?;

    let view_of_angle = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| parse_error("camera fov", e))?;
    let perspective_flag = reader
        .read_u8()
        .map_err(|e| parse_error("camera perspective flag", e))?;

    Ok(CameraKeyframe {
        registered: true,
        position,
        rotation,
        distance,
        view_of_angle: view_of_angle as f32,
        is_perspective: perspective_flag == 0,
        curves: CameraCurveSet::from_bytes(&block),
        ..CameraKeyframe::new_at(FrameIndex::from(frame))
    })
}

fn write_camera_keyframe<W: Write>(writer: &mut W, keyframe: &CameraKeyframe) -> Result<()> {
    writer.write_u32::<LittleEndian>(vmd_frame(keyframe.index)?)?;
    writer.write_f32::<LittleEndian>(keyframe.distance)?;
    for value in keyframe.position.to_array().into_iter().chain(keyframe.rotation.to_array()) {
        writer.write_f32::<LittleEndian>(value)?;
    }
    writer.write_all(&keyframe.curves.to_bytes())?;
    writer.write_u32::<LittleEndian>(keyframe.view_of_angle.round().max(0.0) as u32)?;
    writer.write_u8(if keyframe.is_perspective { 0 } else { 1 })?;
    Ok(())
}

/// 读取一条 IK 记录：帧索引、显示标志、若干 (IK 名称, 启用标志)
fn read_ik_keyframes<R: Read>(reader: &mut R) -> Result<Vec<(String, IkKeyframe)>> {
    let frame = read_count(reader, "IK frame index")?;
    let visible = reader
        .read_u8()
        .map_err(|e| parse_error("IK show flag", e))?
        != 0;
    let count = read_count(reader, "IK info count")?;

    let mut keyframes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut name = [0u8; IK_NAME_LEN];
        reader
            .read_exact(&mut name)
            .map_err(|e| parse_error("IK name", e))?;
        let enabled = reader
            .read_u8()
            .map_err(|e| parse_error("IK enable flag", e))?
            != 0;
        keyframes.push((decode_shift_jis(&name), IkKeyframe::new(frame, visible, enabled)));
    }
    Ok(keyframes)
}

/// 解码 Shift-JIS 字符串（截断到第一个 NUL）
fn decode_shift_jis(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let (decoded, _, _) = SHIFT_JIS.decode(&bytes[..end]);
    decoded.into_owned()
}

/// 编码为定长 Shift-JIS，不足补 NUL，超出时按字符截断
fn encode_shift_jis(text: &str, len: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len);
    let mut buffer = [0u8; 4];
    for ch in text.chars() {
        let (encoded, _, _) = SHIFT_JIS.encode(ch.encode_utf8(&mut buffer));
        if bytes.len() + encoded.len() > len {
            break;
        }
        bytes.extend_from_slice(&encoded);
    }
    bytes.resize(len, 0);
    bytes
}

fn pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut padded = bytes.to_vec();
    padded.resize(len, 0);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_motion() -> Motion {
        let mut motion = Motion::new("初音ミク");
        let eased = BoneCurveSet::new(
            BezierCurve::from_bytes([64, 0, 64, 127]),
            BezierCurve::from_bytes([10, 20, 30, 40]),
            BezierCurve::linear(),
            BezierCurve::from_bytes([0, 64, 64, 127]),
        );

        let center = motion.bones.get("センター");
        center.append(BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY).with_curves(eased.clone()));
        let mut jump = BoneKeyframe::new(30, Vec3::new(1.0, 5.0, -2.0), Quat::from_rotation_y(0.5))
            .with_curves(eased);
        jump.disable_physics = true;
        center.append(jump);
        // 未登录帧不写出
        let mut ghost = BoneKeyframe::new(15, Vec3::ONE, Quat::IDENTITY);
        ghost.registered = false;
        center.append(ghost);

        motion.morphs.get("まばたき").append(MorphKeyframe::new(10, 0.75));

        motion.camera.append(CameraKeyframe {
            registered: true,
            position: Vec3::new(0.0, 10.0, 0.0),
            rotation: Vec3::new(0.1, 0.2, 0.0),
            distance: -45.0,
            view_of_angle: 27.0,
            is_perspective: false,
            ..CameraKeyframe::new_at(FrameIndex::from(5))
        });

        motion.iks.get("左足ＩＫ").append(IkKeyframe::new(0, true, true));
        motion.iks.get("右足ＩＫ").append(IkKeyframe::new(0, true, false));
        motion.iks.get("右足ＩＫ").append(IkKeyframe::new(40, true, true));
        motion
    }

    #[test]
    fn test_round_trip() {
        let motion = sample_motion();
        let bytes = VmdFile::new(motion.clone()).to_bytes().unwrap();
        let loaded = VmdFile::load_from_bytes(&bytes).unwrap().into_motion();

        assert_eq!(loaded.model_name, "初音ミク");

        let center = loaded.bones.find("センター").unwrap();
        assert_eq!(center.len(), 2);
        assert!(!center.contains(15));
        let original = motion.bones.find("センター").unwrap();
        assert_eq!(center.find(0), original.find(0));
        assert_eq!(center.find(30), original.find(30));
        assert!(center.find(30).unwrap().disable_physics);
        assert!(!center.find(0).unwrap().disable_physics);

        let blink = loaded.morphs.find("まばたき").unwrap();
        assert_abs_diff_eq!(blink.find(10).unwrap().weight, 0.75);

        assert_eq!(loaded.camera.find(5), motion.camera.find(5));

        let left = loaded.iks.find("左足ＩＫ").unwrap();
        assert!(left.find(0).unwrap().enabled);
        let right = loaded.iks.find("右足ＩＫ").unwrap();
        assert!(!right.find(0).unwrap().enabled);
        assert!(right.find(40).unwrap().enabled);
        assert_eq!(loaded.max_frame(), 40);
    }

    #[test]
    fn test_curve_block_written_verbatim() {
        let mut block = [0u8; BONE_CURVE_BLOCK_LEN];
        for (i, value) in block.iter_mut().enumerate() {
            *value = ((i * 7) % 128) as u8;
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&pad(VMD_HEADER_V2, HEADER_LEN));
        bytes.extend_from_slice(&encode_shift_jis("model", MODEL_NAME_LEN));
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&encode_shift_jis("頭", TRACK_NAME_LEN));
        bytes.extend_from_slice(&3u32.to_le_bytes());
        for value in [0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&block);
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let file = VmdFile::load_from_bytes(&bytes).unwrap();
        let written = file.to_bytes().unwrap();
        let offset = HEADER_LEN + MODEL_NAME_LEN + 4 + TRACK_NAME_LEN + 4 + 28;
        assert_eq!(&written[offset..offset + BONE_CURVE_BLOCK_LEN], &block[..]);
    }

    #[test]
    fn test_old_file_without_camera_section() {
        let motion = sample_motion();
        let bytes = VmdFile::new(motion).to_bytes().unwrap();
        // 截到 Morph 段结束
        let bone_section = 4 + 2 * (TRACK_NAME_LEN + 4 + 12 + 16 + BONE_CURVE_BLOCK_LEN);
        let morph_section = 4 + TRACK_NAME_LEN + 4 + 4;
        let end = HEADER_LEN + MODEL_NAME_LEN + bone_section + morph_section;

        let loaded = VmdFile::load_from_bytes(&bytes[..end]).unwrap().into_motion();
        assert_eq!(loaded.bones.find("センター").unwrap().len(), 2);
        assert_eq!(loaded.morphs.len(), 1);
        assert!(loaded.camera.is_empty());
        assert!(loaded.iks.is_empty());
    }

    #[test]
    fn test_invalid_header() {
        let bytes = vec![0u8; 64];
        assert!(matches!(
            VmdFile::load_from_bytes(&bytes),
            Err(MmdError::VmdParse(_))
        ));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = VmdFile::new(sample_motion()).to_bytes().unwrap();
        let cut = HEADER_LEN + MODEL_NAME_LEN + 4 + 20;
        assert!(VmdFile::load_from_bytes(&bytes[..cut]).is_err());
    }

    #[test]
    fn test_fractional_index_rejected() {
        let mut motion = Motion::new("model");
        motion.morphs.get("あ").append(MorphKeyframe::new(2.5f32, 1.0));
        assert!(matches!(
            VmdFile::new(motion).to_bytes(),
            Err(MmdError::Animation(_))
        ));
    }

    #[test]
    fn test_shift_jis_names() {
        let encoded = encode_shift_jis("センター", TRACK_NAME_LEN);
        assert_eq!(encoded.len(), TRACK_NAME_LEN);
        assert_eq!(decode_shift_jis(&encoded), "センター");

        // 每个全角字符 2 字节，15 字节只能放 7 个
        let long = "あいうえおかきくけこ";
        let truncated = encode_shift_jis(long, TRACK_NAME_LEN);
        assert_eq!(decode_shift_jis(&truncated), "あいうえおかき");
    }
}
