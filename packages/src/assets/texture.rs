// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Textures. The cooked payload of a texture is:
//!
//! ```text
//! u32 image_count
//! image_count times:
//!     u32 format, bpp, frame_count
//!     frame_count times:
//!         u32 mip_count, flags
//!         mip_count times:
//!             u32 width, height, stride, data_size
//!             data, padded to 4 bytes
//! ```
//!
//! The sampling settings are in the entry's tag, see [`TextureTag`].

use file_system::{FileReadTask, Media};
use image::{imageops::FilterType, load_from_memory, DynamicImage};
use tracing::{debug, trace};

use crate::{
    asset::Asset,
    asset_type::AssetType,
    assets::{cooked_path, key_flags, payload_name},
    binary::{BinReader, BinWriter},
    cooker::{status_from_comparisons, Cooker, CookerContext, CookerType, Pass, TargetPolicy, TrackedKey},
    entry::Entry,
    flags::{CookStatus, PFlags, Stage},
    language::Language,
    package_man::PackageMan,
    result::{SinkError, SinkResult, Status},
    sink::{Sink, SinkType},
    time_slice::TimeSlice,
};

/// 8 bits per channel RGBA, the only format textures are cooked to.
pub const TEXTURE_FORMAT_RGBA8: u32 = 0;

/// The sampling settings of a texture, stored as the entry's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureTag(pub u8);

impl TextureTag {
    pub const WRAP_S: u8 = 1;
    pub const WRAP_T: u8 = 2;
    pub const WRAP_R: u8 = 4;
    pub const MIPMAP: u8 = 8;
    pub const FILTER_BILINEAR: u8 = 16;
    pub const FILTER_TRILINEAR: u8 = 32;
    pub const LOCALIZED: u8 = 64;

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// The first byte of a tag, or no settings for an empty tag.
    pub fn from_tag(tag: Option<&[u8]>) -> TextureTag {
        TextureTag(tag.and_then(|tag| tag.first().copied()).unwrap_or(0))
    }

    pub fn from_keys(entry: &Entry, flags: PFlags) -> Result<TextureTag, SinkError> {
        let bool_key = |path: &str| {
            entry
                .key_value::<bool>(path, flags)
                .ok_or_else(|| SinkError::missing_key(path))
        };
        let mut tag = 0;
        for (path, flag) in [
            ("Wrap.S", Self::WRAP_S),
            ("Wrap.T", Self::WRAP_T),
            ("Wrap.R", Self::WRAP_R),
            ("Mipmap", Self::MIPMAP),
            ("Localized", Self::LOCALIZED),
        ] {
            if bool_key(path)? {
                tag |= flag;
            }
        }
        // Older schemas had a checkbox for bilinear filtering.
        match entry.key_value::<String>("Filter", flags) {
            Some(filter) if filter == "Bilinear" => tag |= Self::FILTER_BILINEAR,
            Some(filter) if filter == "Trilinear" => tag |= Self::FILTER_TRILINEAR,
            Some(_) => {}
            None if bool_key("Filter")? => tag |= Self::FILTER_BILINEAR,
            None => {}
        }
        Ok(TextureTag(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureMip {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureFrame {
    pub flags: u32,
    /// The full size image first, then each smaller mip level.
    pub mips: Vec<TextureMip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub format: u32,
    /// Bytes per pixel.
    pub bpp: u32,
    pub frames: Vec<TextureFrame>,
}

impl TextureImage {
    /// Decodes a source image file into RGBA8, with a full mip chain down to
    /// 1x1 if `mipmap` is set.
    pub fn decode(bytes: &[u8], path: &str, mipmap: bool) -> Result<TextureImage, SinkError> {
        let image = load_from_memory(bytes)
            .map_err(|err| SinkError::InvalidFormat(format!("{path} is not a supported image: {err}")))?;
        let mut mips = vec![rgba_mip(&image)];
        if mipmap {
            let (mut width, mut height) = (image.width(), image.height());
            while width > 1 || height > 1 {
                width = (width / 2).max(1);
                height = (height / 2).max(1);
                mips.push(rgba_mip(&image.resize_exact(width, height, FilterType::CatmullRom)));
            }
        }
        Ok(TextureImage {
            format: TEXTURE_FORMAT_RGBA8,
            bpp: 4,
            frames: vec![TextureFrame { flags: 0, mips }],
        })
    }
}

fn rgba_mip(image: &DynamicImage) -> TextureMip {
    let rgba = image.to_rgba8();
    TextureMip {
        width: rgba.width(),
        height: rgba.height(),
        stride: rgba.width() * 4,
        data: rgba.into_raw(),
    }
}

pub fn encode_images(images: &[TextureImage]) -> Result<Vec<u8>, SinkError> {
    let too_big = || SinkError::InvalidFormat("texture data doesn't fit in 32 bits".into());
    let mut writer = BinWriter::new();
    writer.put(images.len() as u32);
    for image in images {
        writer
            .put(image.format)
            .put(image.bpp)
            .put(image.frames.len() as u32);
        for frame in &image.frames {
            writer.put(frame.mips.len() as u32).put(frame.flags);
            for mip in &frame.mips {
                let size = u32::try_from(mip.data.len()).map_err(|_| too_big())?;
                writer
                    .put([mip.width, mip.height, mip.stride, size])
                    .put_bytes(&mip.data)
                    .pad4();
            }
        }
    }
    Ok(writer.into_bytes())
}

/// Reads the source image of a texture for `language`, from the keys for
/// `flags`.
fn load_source(man: &PackageMan, entry: &Entry, flags: PFlags, language: Language) -> Result<TextureImage, SinkError> {
    let tag = TextureTag::from_keys(entry, flags)?;
    let file = entry
        .key_value::<String>("Source.File", flags)
        .filter(|file| !file.is_empty())
        .ok_or_else(|| SinkError::missing_key("Source.File"))?;
    let file = if tag.has(TextureTag::LOCALIZED) {
        language.localize_path(&file)
    } else {
        file
    };
    let bytes = man.fs().read(&file, Media::DISK).map_err(|err| {
        if err.is_not_found() {
            SinkError::MissingFile(file.clone())
        } else {
            err.into()
        }
    })?;
    TextureImage::decode(&bytes, &file, tag.has(TextureTag::MIPMAP))
}

/// Walks through a cooked payload, one mip per step.
struct CookedCursor {
    bytes: Vec<u8>,
    name: String,
    pos: usize,
    images_left: u32,
    frames_left: u32,
    mips_left: u32,
}

impl CookedCursor {
    fn new(bytes: Vec<u8>, name: String) -> Result<CookedCursor, SinkError> {
        let images_left = BinReader::new(&bytes, &name).get::<u32>()?;
        Ok(CookedCursor {
            bytes,
            name,
            pos: 4,
            images_left,
            frames_left: 0,
            mips_left: 0,
        })
    }

    /// Reads up to the next mip. Returns true once everything has been read.
    fn step(&mut self, images: &mut Vec<TextureImage>) -> Result<bool, SinkError> {
        let mut reader = BinReader::new(&self.bytes[self.pos..], &self.name);
        let done = loop {
            if self.mips_left > 0 {
                let [width, height, stride, size]: [u32; 4] = reader.get()?;
                let data = reader.bytes(size as usize)?.to_vec();
                reader.align4()?;
                let frame = images
                    .last_mut()
                    .and_then(|image| image.frames.last_mut())
                    .ok_or_else(|| SinkError::CorruptFile(self.name.clone()))?;
                frame.mips.push(TextureMip {
                    width,
                    height,
                    stride,
                    data,
                });
                self.mips_left -= 1;
                break false;
            } else if self.frames_left > 0 {
                let [mip_count, flags]: [u32; 2] = reader.get()?;
                let image = images
                    .last_mut()
                    .ok_or_else(|| SinkError::CorruptFile(self.name.clone()))?;
                image.frames.push(TextureFrame {
                    flags,
                    mips: Vec::new(),
                });
                self.frames_left -= 1;
                self.mips_left = mip_count;
            } else if self.images_left > 0 {
                let [format, bpp, frame_count]: [u32; 3] = reader.get()?;
                images.push(TextureImage {
                    format,
                    bpp,
                    frames: Vec::new(),
                });
                self.images_left -= 1;
                self.frames_left = frame_count;
            } else {
                break true;
            }
        };
        self.pos += reader.position();
        Ok(done)
    }
}

enum LoadState {
    Idle,
    Reading(FileReadTask),
    Decoding(CookedCursor),
    Done,
}

/// Loads a texture's images.
///
/// Cooked textures are read from their cooked payload, one mip per step, so
/// a load can be spread over several time slices. Uncooked textures are
/// cooked into the intermediate directory first when loading, and decoded
/// straight from the source file when only parsing.
pub struct TextureParser {
    state: LoadState,
    tag: TextureTag,
    images: Vec<TextureImage>,
}

impl TextureParser {
    pub fn tag(&self) -> TextureTag {
        self.tag
    }

    pub fn images(&self) -> &[TextureImage] {
        &self.images
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Done)
    }

    fn begin_read(&mut self, man: &PackageMan, asset: &Asset) -> Result<FileReadTask, SinkError> {
        let language = man.config().language;
        if asset.is_cooked() {
            self.tag = TextureTag::from_tag(asset.entry().tag_data(Some(man.config().host)));
            let mut path = cooked_path(asset, Language::English);
            if self.tag.has(TextureTag::LOCALIZED) {
                let localized = cooked_path(asset, language);
                if man.fs().exists(&localized, Media::ALL) {
                    path = localized;
                }
            }
            return Ok(man.fs().begin_read(&path, Media::ALL, None));
        }

        let mut cooker = asset.allocate_intermediate_cooker()?;
        let allflags = man.config().host.flag();
        match cooker.status(PFlags::NONE, allflags) {
            CookStatus::UpToDate => {}
            CookStatus::NeedRebuild => {
                debug!(asset = %asset.path(), "building intermediate texture data");
                cooker.cook(PFlags::NONE, allflags)?;
            }
            CookStatus::Ignore => {
                return Err(SinkError::Compiler(format!(
                    "{}: the texture cooker skipped the generic data",
                    asset.path()
                )))
            }
        }
        let cx = cooker.context();
        self.tag = TextureTag::from_tag(Some(cx.read_tag(PFlags::NONE)?.as_slice()));
        let language = if self.tag.has(TextureTag::LOCALIZED) {
            language
        } else {
            Language::English
        };
        Ok(cx.begin_read(&payload_name(cx.asset_path(), language), PFlags::NONE, None))
    }

    fn load(&mut self, time: &TimeSlice, man: &PackageMan, asset: &Asset) -> SinkResult {
        loop {
            match core::mem::replace(&mut self.state, LoadState::Idle) {
                LoadState::Idle => {
                    self.images.clear();
                    self.state = LoadState::Reading(self.begin_read(man, asset)?);
                }
                LoadState::Reading(mut task) => {
                    let path = task.path().to_string();
                    let result = if time.is_infinite() {
                        task.wait()
                    } else {
                        match task.poll() {
                            Some(result) => result,
                            None => {
                                self.state = LoadState::Reading(task);
                                return Ok(Status::Pending);
                            }
                        }
                    };
                    self.state = LoadState::Decoding(CookedCursor::new(result?, path)?);
                }
                LoadState::Decoding(mut cursor) => {
                    if cursor.step(&mut self.images)? {
                        self.state = LoadState::Done;
                        trace!(asset = %asset.path(), images = self.images.len(), "loaded texture");
                        return Ok(Status::Success);
                    }
                    self.state = LoadState::Decoding(cursor);
                }
                LoadState::Done => {
                    self.state = LoadState::Done;
                    return Ok(Status::Success);
                }
            }
            if time.expired() {
                return Ok(Status::Pending);
            }
        }
    }
}

impl Sink for TextureParser {
    fn process(&mut self, time: &TimeSlice, man: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
        if flags.intersects(PFlags::UNLOAD | PFlags::CANCEL) {
            self.state = LoadState::Idle;
            self.images.clear();
            return Ok(Status::Success);
        }
        if !flags.intersects(PFlags::LOAD | PFlags::PARSE | PFlags::INFO | PFlags::TRIM) || self.is_loaded() {
            return Ok(Status::Success);
        }

        if !asset.is_cooked() && !flags.contains(PFlags::LOAD) {
            let flags = key_flags(man, flags);
            self.tag = TextureTag::from_keys(asset.entry(), flags)?;
            self.images = vec![load_source(man, asset.entry(), flags, man.config().language)?];
            self.state = LoadState::Done;
            return Ok(Status::Success);
        }

        let result = self.load(time, man, asset);
        if result.is_err() {
            self.images.clear();
        }
        result
    }
}

impl SinkType for TextureParser {
    const ASSET_TYPE: AssetType = AssetType::Texture;
    const STAGE: Stage = Stage::PARSER;
    fn create(_: &Asset) -> Self {
        TextureParser {
            state: LoadState::Idle,
            tag: TextureTag::default(),
            images: Vec::new(),
        }
    }
}

pub struct TextureCooker;

impl TextureCooker {
    const POLICY: TargetPolicy = TargetPolicy {
        keys: &[
            TrackedKey::String("Source.File"),
            TrackedKey::Bool("Wrap.S"),
            TrackedKey::Bool("Wrap.T"),
            TrackedKey::Bool("Wrap.R"),
            TrackedKey::Bool("Mipmap"),
            TrackedKey::String("Filter"),
            TrackedKey::Bool("Localized"),
        ],
        gles_sensitive: false,
    };

    fn compare(cx: &mut CookerContext, flags: PFlags, localized: bool) -> [i32; 3] {
        [
            cx.compare_version(flags),
            cx.compare_modified_time(flags),
            cx.compare_cached_file_time_key(flags, "Source.File", localized.then_some("Localized")),
        ]
    }
}

impl Cooker for TextureCooker {
    fn version(&self) -> i32 {
        3
    }

    fn status(&mut self, cx: &mut CookerContext, flags: PFlags, allflags: PFlags) -> CookStatus {
        match Self::POLICY.pass(cx.entry(), flags, allflags) {
            Pass::Ignore => CookStatus::Ignore,
            Pass::Build(_) => {
                let localized = cx.entry().key_value::<bool>("Localized", flags).unwrap_or(false);
                status_from_comparisons(&Self::compare(cx, flags, localized))
            }
        }
    }

    fn compile(&mut self, cx: &mut CookerContext, flags: PFlags, _: PFlags) -> Result<(), SinkError> {
        let entry = cx.entry().clone();
        let tag = TextureTag::from_keys(&entry, flags)?;
        let localized = tag.has(TextureTag::LOCALIZED);
        Self::compare(cx, flags, localized);
        cx.write_tag(flags, &[tag.0])?;

        let languages: Vec<Language> = if localized {
            cx.languages().iter().collect()
        } else {
            vec![Language::English]
        };
        for language in languages {
            let image = load_source(cx.man(), &entry, flags, language).inspect_err(|err| {
                if language != Language::English {
                    debug!(asset = %cx.asset_path(), language = language.code(), "localized variant failed: {err}");
                }
            })?;
            let path = payload_name(cx.asset_path(), language);
            cx.write_file(&path, flags, &encode_images(&[image])?)?;
        }
        Ok(())
    }
}

impl CookerType for TextureCooker {
    const ASSET_TYPE: AssetType = AssetType::Texture;
    fn create() -> Self {
        TextureCooker
    }
}

#[cfg(test)]
mod tests {
    use file_system::{FileSystem, Media, MemoryFileSystem};

    use crate::{
        asset_type::AssetType,
        assets::bind_all,
        flags::{CookStatus, PFlags, Zone},
        keys::Variant,
        language::{Language, Languages},
        result::{SinkError, Status},
        test_util::{package_man, write_png},
        time_slice::TimeSlice,
    };

    use super::{encode_images, TextureImage, TextureParser, TextureTag};

    #[test]
    fn tags_from_keys() {
        let (_, man) = package_man();
        let package = man.create_package("World").unwrap();
        let entry = package.create_entry("Rock", AssetType::Texture).unwrap();
        let defaults = TextureTag::from_keys(&entry, PFlags::TARGET_PC).unwrap();
        assert_eq!(1 | 2 | 4 | 8 | 32, defaults.0);

        entry.set_key("Wrap.T", Variant::Bool(false));
        entry.set_key("Filter.IPhone", Variant::String("Bilinear".into()));
        entry.set_key("Localized", Variant::Bool(true));
        assert_eq!(
            1 | 4 | 8 | 16 | 64,
            TextureTag::from_keys(&entry, PFlags::TARGET_IPHONE).unwrap().0
        );
        entry.set_key("Mipmap", Variant::String("yes".into()));
        assert_eq!(
            TextureTag(1 | 4 | 8 | 32 | 64),
            TextureTag::from_keys(&entry, PFlags::TARGET_PC).unwrap()
        );
    }

    #[test]
    fn decodes_mip_chains() {
        let fs = MemoryFileSystem::new();
        write_png(&fs, "Textures/rock.png", 4, [255, 0, 0, 255]);
        let bytes = fs.read("Textures/rock.png", Media::DISK).unwrap();

        let image = TextureImage::decode(&bytes, "Textures/rock.png", true).unwrap();
        let sizes: Vec<(u32, u32)> = image.frames[0].mips.iter().map(|mip| (mip.width, mip.height)).collect();
        assert_eq!(vec![(4, 4), (2, 2), (1, 1)], sizes);
        assert_eq!(&[255, 0, 0, 255], &image.frames[0].mips[2].data[..]);

        let image = TextureImage::decode(&bytes, "Textures/rock.png", false).unwrap();
        assert_eq!(1, image.frames[0].mips.len());
        assert!(matches!(
            TextureImage::decode(b"not a png", "a.png", true),
            Err(SinkError::InvalidFormat(_))
        ));

        // Counts and headers, then the single 4x4 mip.
        let encoded = encode_images(&[image]).unwrap();
        assert_eq!(4 + 12 + 8 + 16 + 64, encoded.len());
    }

    #[test]
    fn localized_variants_are_cooked_per_language() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        write_png(&fs, "Textures/sign.png", 2, [0, 0, 255, 255]);
        write_png(&fs, "Textures/sign_fr.png", 2, [255, 255, 255, 255]);
        let package = man.create_package("Town").unwrap();
        let entry = package.create_entry("Sign", AssetType::Texture).unwrap();
        entry.set_key("Source.File", Variant::String("Textures/sign.png".into()));
        entry.set_key("Localized", Variant::Bool(true));

        let asset = package.asset(entry.id(), Zone::Cooker).unwrap();
        let languages: Languages = [Language::English, Language::French].into_iter().collect();
        let mut cooker = man.create_cooker(asset, true, languages, PFlags::TARGET_PC).unwrap();
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::NONE, PFlags::TARGET_PC));
        cooker.cook(PFlags::NONE, PFlags::TARGET_PC).unwrap();

        assert!(fs.exists("Cooked/Out/Generic/Town/Sign.bin", Media::DISK));
        assert!(fs.exists("Cooked/Out/Generic/Town/Sign_fr.bin", Media::DISK));
        assert_eq!(
            vec![1 | 2 | 4 | 8 | 32 | 64],
            fs.read("Cooked/Out/Tags/Town/Sign.tag", Media::DISK).unwrap()
        );
        assert_eq!(CookStatus::UpToDate, cooker.status(PFlags::NONE, PFlags::TARGET_PC));

        // A new French variant rebuilds the texture.
        write_png(&fs, "Textures/sign_fr.png", 2, [0, 0, 0, 255]);
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::NONE, PFlags::TARGET_PC));
    }

    #[test]
    fn uncooked_loads_resume_across_time_slices() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        write_png(&fs, "Textures/rock.png", 4, [10, 20, 30, 255]);
        let package = man.create_package("World").unwrap();
        let entry = package.create_entry("Rock", AssetType::Texture).unwrap();
        entry.set_key("Source.File", Variant::String("Textures/rock.png".into()));
        let asset = package.asset(entry.id(), Zone::Engine).unwrap();

        let mut calls = 0;
        loop {
            calls += 1;
            match asset.process(&TimeSlice::expired_now(), PFlags::LOAD).unwrap() {
                Status::Pending => assert!(calls < 20),
                Status::Success => break,
            }
        }
        // Starting the read, reading the header, one call per mip, and the
        // final check for more data.
        assert_eq!(6, calls);
        assert!(fs.exists("Temp/Out/Generic/World/Rock.bin", Media::DISK));

        let (tag, mips) = asset
            .with_sink(|parser: &mut TextureParser| {
                let mips = parser.images()[0].frames[0].mips.clone();
                (parser.tag(), mips)
            })
            .unwrap();
        assert!(tag.has(TextureTag::MIPMAP));
        assert_eq!(3, mips.len());
        assert_eq!(64, mips[0].data.len());
        assert_eq!(&[10, 20, 30, 255], &mips[0].data[..4]);

        // Loaded textures stay loaded until they're unloaded.
        assert_eq!(Status::Success, asset.process(&TimeSlice::expired_now(), PFlags::LOAD).unwrap());
        asset.process(&TimeSlice::INFINITE, PFlags::UNLOAD).unwrap();
        assert_eq!(Some(0), asset.with_sink(|parser: &mut TextureParser| parser.images().len()));
        assert_eq!(Status::Success, asset.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap());
    }

    #[test]
    fn parsing_reads_the_source_directly() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        write_png(&fs, "Textures/moss.png", 2, [0, 255, 0, 255]);
        let package = man.create_package("World").unwrap();
        let entry = package.create_entry("Moss", AssetType::Texture).unwrap();
        entry.set_key("Source.File", Variant::String("Textures/moss.png".into()));
        entry.set_key("Mipmap", Variant::Bool(false));
        let asset = package.asset(entry.id(), Zone::ContentBrowser).unwrap();

        asset.process(&TimeSlice::INFINITE, PFlags::PARSE).unwrap();
        let mips = asset.with_sink(|parser: &mut TextureParser| parser.images()[0].frames[0].mips.len());
        assert_eq!(Some(1), mips);
        assert!(!fs.exists("Temp/Out/Generic/World/Moss.bin", Media::DISK));

        let missing = package.create_entry("Gone", AssetType::Texture).unwrap();
        missing.set_key("Source.File", Variant::String("Textures/gone.png".into()));
        let asset = package.asset(missing.id(), Zone::ContentBrowser).unwrap();
        assert!(matches!(
            asset.process(&TimeSlice::INFINITE, PFlags::PARSE),
            Err(SinkError::MissingFile(_))
        ));
    }
}
