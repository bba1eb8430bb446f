//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Texture resources: immutable-storage images whose extent (2D, 3D,
//! array, cube, with or without mipmaps) is selected by `TextureTypeFlags`.
use crate::context::{Context, Handle};
use crate::error::{GraphicsError, Result};
use crate::graphics::Graphics;
use crate::resource::{create_async, create_async_finished, AsyncResourceState};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// `NORMAL` (the empty set) is a plain 2D texture; every other legal
    /// value is one of the ten combinations `check_valid` accepts.
    pub struct TextureTypeFlags: u32 {
        const NORMAL  = 0;
        const MIPMAP  = 0b0001;
        const THREE_D = 0b0010;
        const ARRAY   = 0b0100;
        const CUBE    = 0b1000;
    }
}

/// Rejects any combination not among the ten the backend actually
/// supports (a 3D cube array, for instance, does not exist).
fn check_valid_texture_type_flags(flags: TextureTypeFlags) -> Result<()> {
    use TextureTypeFlags as F;
    let legal = [
        F::NORMAL,
        F::MIPMAP,
        F::THREE_D,
        F::THREE_D | F::MIPMAP,
        F::ARRAY,
        F::ARRAY | F::MIPMAP,
        F::CUBE,
        F::CUBE | F::MIPMAP,
        F::CUBE | F::ARRAY,
        F::CUBE | F::ARRAY | F::MIPMAP,
    ];
    if legal.contains(&flags) {
        Ok(())
    } else {
        Err(GraphicsError::Resource(
            crate::error::ResourceError::InvalidTextureConfig(format!(
                "unsupported texture type_flags combination: {:?}",
                flags
            )),
        ))
    }
}

/// The legal pixel formats, normative in the crate's resource-option
/// surface. Not every backend need support every entry; the mock backend
/// accepts all of them since it never actually touches pixel data.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TextureFormat {
    R8,
    R5g6b5,
    R8g8b8,
    R8g8b8Srgb,
    R8g8b8a8,
    R8g8b8a8Srgb,
    Dxt1,
    Dxt3,
    Dxt5,
    Rgtc1Unorm,
    Rgtc1Snorm,
    Rgtc2Unorm,
    Rgtc2Snorm,
    BptcUnorm,
    BptcSrgb,
    BptcSfloat,
    BptcUfloat,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CubeFace {
    PlusZ,
    MinusZ,
    PlusX,
    MinusX,
    PlusY,
    MinusY,
}

/// Upload order the backend expects for cube faces.
pub const CUBE_FACE_UPLOAD_ORDER: [CubeFace; 6] = [
    CubeFace::PlusZ,
    CubeFace::MinusZ,
    CubeFace::PlusX,
    CubeFace::MinusX,
    CubeFace::PlusY,
    CubeFace::MinusY,
];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Clone)]
pub struct MipLevelImage {
    /// One entry for a non-cube texture, six (in `CUBE_FACE_UPLOAD_ORDER`)
    /// for a cube texture.
    pub faces: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    /// Depth for `THREE_D`, layer count for `ARRAY`; ignored otherwise.
    pub depth: u32,
    pub format: TextureFormat,
    pub type_flags: TextureTypeFlags,
    pub mip_levels: Vec<MipLevelImage>,
    pub filter: Filter,
    pub mip_filter: Filter,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub wrap_w: WrapMode,
}

pub struct Texture {
    state: Arc<AsyncResourceState<TextureDescriptor>>,
}

fn destroy_fn(context: &mut dyn Context, handle: Handle) {
    context.destroy_texture(handle);
}

impl Texture {
    fn build(
        graphics: &Arc<Graphics>,
        desc: TextureDescriptor,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<Arc<Texture>> {
        check_valid_texture_type_flags(desc.type_flags)?;
        let is_cube = desc.type_flags.contains(TextureTypeFlags::CUBE);

        let create = move |context: &mut dyn Context, desc: &TextureDescriptor| {
            let handle = context.create_texture(desc)?;
            for (level, image) in desc.mip_levels.iter().enumerate() {
                if is_cube {
                    for (face, data) in CUBE_FACE_UPLOAD_ORDER.iter().zip(image.faces.iter()) {
                        context.upload_texture_image(handle, level as u32, Some(*face), data);
                    }
                } else if let Some(data) = image.faces.first() {
                    context.upload_texture_image(handle, level as u32, None, data);
                }
            }
            Ok(handle)
        };

        let state = if blocking {
            create_async_finished(graphics, desc, name, destroy_fn, create)?
        } else {
            create_async(graphics, desc, name, destroy_fn, create)?
        };
        Ok(Arc::new(Texture { state }))
    }

    pub fn create(graphics: &Arc<Graphics>, desc: TextureDescriptor) -> Result<Arc<Texture>> {
        Self::build(graphics, desc, None, false)
    }

    pub fn create_finished(
        graphics: &Arc<Graphics>,
        desc: TextureDescriptor,
    ) -> Result<Arc<Texture>> {
        Self::build(graphics, desc, None, true)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn handle(&self) -> Option<Handle> {
        self.state.handle()
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.state.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_combinations_are_accepted() {
        use TextureTypeFlags as F;
        for &flags in &[
            F::NORMAL,
            F::MIPMAP,
            F::THREE_D,
            F::THREE_D | F::MIPMAP,
            F::ARRAY,
            F::ARRAY | F::MIPMAP,
            F::CUBE,
            F::CUBE | F::MIPMAP,
            F::CUBE | F::ARRAY,
            F::CUBE | F::ARRAY | F::MIPMAP,
        ] {
            assert!(check_valid_texture_type_flags(flags).is_ok(), "{:?}", flags);
        }
    }

    #[test]
    fn illegal_combination_is_rejected() {
        use TextureTypeFlags as F;
        assert!(check_valid_texture_type_flags(F::THREE_D | F::CUBE).is_err());
        assert!(check_valid_texture_type_flags(F::THREE_D | F::ARRAY).is_err());
    }

    #[test]
    fn cube_face_upload_order_matches_spec() {
        assert_eq!(
            CUBE_FACE_UPLOAD_ORDER,
            [
                CubeFace::PlusZ,
                CubeFace::MinusZ,
                CubeFace::PlusX,
                CubeFace::MinusX,
                CubeFace::PlusY,
                CubeFace::MinusY,
            ]
        );
    }
}
