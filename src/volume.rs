//! Loading of label volumes from NIfTI files.

use camino::Utf8Path;
use ndarray::{Array3, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::CuratorError;

/// Maps a file path to an in-memory volume.
pub trait VolumeReader {
    type Volume;

    fn read(&self, path: &Utf8Path) -> Result<Self::Volume, CuratorError>;
}

impl<T: VolumeReader + ?Sized> VolumeReader for &T {
    type Volume = T::Volume;

    fn read(&self, path: &Utf8Path) -> Result<Self::Volume, CuratorError> {
        (**self).read(path)
    }
}

/// Binary structure mask, stored as (z, H, W).
#[derive(Debug, Clone)]
pub struct LabelVolume {
    // `NiftiHeader` is a large stack object; keep it boxed.
    header: Box<NiftiHeader>,
    data: Array3<u8>,
}

impl LabelVolume {
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of non-zero voxels.
    pub fn foreground_voxels(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiReader;

impl VolumeReader for NiftiReader {
    type Volume = LabelVolume;

    fn read(&self, path: &Utf8Path) -> Result<LabelVolume, CuratorError> {
        let volume_err = |message: String| CuratorError::VolumeRead {
            path: path.to_path_buf(),
            message,
        };
        let obj = ReaderOptions::new()
            .read_file(path.as_std_path())
            .map_err(|err| volume_err(err.to_string()))?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W]
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()
            .map_err(|err| volume_err(err.to_string()))?
            .into_dimensionality::<Ix3>()
            .map_err(|err| volume_err(err.to_string()))?
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned();

        Ok(LabelVolume { header, data })
    }
}
