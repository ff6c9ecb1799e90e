//! Dense label and probability volumes.
//!
//! The engine works on N-dimensional rectangular voxel grids stored
//! row-major. [`LabelVolume`] carries the integer over-segmentation,
//! [`ProbabilityMap`] the boundary probabilities (optionally with a trailing
//! channel axis), and [`Connectivity`] enumerates the neighbourhood offsets
//! used during the construction sweep.

use ndarray::{ArrayD, IxDyn};

pub use crate::error::VolumeError;

/// Neighbourhood structure used when sweeping a volume.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Connectivity {
    /// Face-connected neighbours only: 4-connectivity in 2D, 6 in 3D.
    #[default]
    Faces,
    /// All voxels in the surrounding unit cube: 8-connectivity in 2D, 26 in 3D.
    Full,
}

impl Connectivity {
    /// Offsets pointing "forward" in scan order: the first nonzero component
    /// of each offset is positive, so every unordered voxel pair is visited
    /// exactly once and the offset target is always the scan-later member.
    #[must_use]
    pub fn forward_offsets(self, ndim: usize) -> Vec<Vec<isize>> {
        match self {
            Self::Faces => (0..ndim)
                .map(|axis| {
                    let mut offset = vec![0_isize; ndim];
                    offset[axis] = 1;
                    offset
                })
                .collect(),
            Self::Full => enumerate_cube_offsets(ndim)
                .into_iter()
                .filter(|offset| is_scan_forward(offset))
                .collect(),
        }
    }

    /// All offsets in both directions.
    #[must_use]
    pub fn all_offsets(self, ndim: usize) -> Vec<Vec<isize>> {
        let mut offsets = self.forward_offsets(ndim);
        let backward: Vec<Vec<isize>> = offsets
            .iter()
            .map(|offset| offset.iter().map(|component| -component).collect())
            .collect();
        offsets.extend(backward);
        offsets
    }
}

fn enumerate_cube_offsets(ndim: usize) -> Vec<Vec<isize>> {
    let mut offsets = Vec::new();
    let count = 3_usize.pow(ndim as u32);
    for code in 0..count {
        let mut offset = vec![0_isize; ndim];
        let mut rest = code;
        for component in offset.iter_mut().rev() {
            *component = (rest % 3) as isize - 1;
            rest /= 3;
        }
        if offset.iter().any(|&component| component != 0) {
            offsets.push(offset);
        }
    }
    offsets
}

fn is_scan_forward(offset: &[isize]) -> bool {
    offset
        .iter()
        .find(|&&component| component != 0)
        .is_some_and(|&component| component > 0)
}

/// Row-major index arithmetic over a rectangular grid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Grid {
    shape: Vec<usize>,
    strides: Vec<usize>,
    len: usize,
}

impl Grid {
    pub(crate) fn from_shape(shape: &[usize]) -> Result<Self, VolumeError> {
        if shape.is_empty() || shape.iter().any(|&extent| extent == 0) {
            return Err(VolumeError::EmptyVolume);
        }
        let mut strides = vec![1_usize; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }
        let len = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            strides,
            len,
        })
    }

    pub(crate) fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub(crate) fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn decode_into(&self, index: usize, coords: &mut [usize]) {
        let mut rest = index;
        for (axis, stride) in self.strides.iter().enumerate() {
            coords[axis] = rest / stride;
            rest %= stride;
        }
    }

    /// Applies `offset` to `coords`, returning the linear index of the
    /// neighbour or `None` when it falls outside the grid.
    pub(crate) fn offset_index(&self, coords: &[usize], offset: &[isize]) -> Option<usize> {
        let mut index = 0_usize;
        for axis in 0..self.shape.len() {
            let shifted = coords[axis] as isize + offset[axis];
            if shifted < 0 || shifted as usize >= self.shape[axis] {
                return None;
            }
            index += shifted as usize * self.strides[axis];
        }
        Some(index)
    }
}

/// A dense integer label volume: the initial over-segmentation.
///
/// Label `0` is reserved for the boundary/background class when the graph is
/// built in nozeros mode; such voxels belong to no region.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelVolume {
    grid: Grid,
    data: Vec<u32>,
}

impl LabelVolume {
    /// Builds a label volume from a dense array.
    ///
    /// # Errors
    /// Returns [`VolumeError::EmptyVolume`] when the array has no elements.
    pub fn from_array(array: &ArrayD<u32>) -> Result<Self, VolumeError> {
        let grid = Grid::from_shape(array.shape())?;
        let data = array.iter().copied().collect();
        Ok(Self { grid, data })
    }

    /// Returns the spatial shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    /// Returns the number of voxels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    /// Returns whether the volume is empty. Construction rejects empty
    /// volumes, so this is always `false` on a built instance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the label at a linear row-major index.
    #[must_use]
    pub fn label(&self, index: usize) -> u32 {
        self.data[index]
    }

    /// Returns the largest label present.
    #[must_use]
    pub fn max_label(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    pub(crate) fn grid(&self) -> &Grid {
        &self.grid
    }

    pub(crate) fn data(&self) -> &[u32] {
        &self.data
    }

    /// Rebuilds the dense array representation.
    #[must_use]
    pub fn to_array(&self) -> ArrayD<u32> {
        ArrayD::from_shape_vec(IxDyn(self.grid.shape()), self.data.clone())
            .expect("shape and data length are kept consistent by construction")
    }
}

/// A dense boundary-probability map, shared read-only with the graph.
///
/// The map must match the label volume's spatial shape; a single trailing
/// axis is interpreted as per-voxel channels. Channel `0` is the boundary
/// channel used by boundary-statistic priorities.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityMap {
    grid: Grid,
    channels: usize,
    data: Vec<f32>,
}

impl ProbabilityMap {
    /// Builds a probability map validated against a spatial shape.
    ///
    /// # Errors
    /// Returns [`VolumeError::ShapeMismatch`] when the array matches neither
    /// `spatial` nor `spatial + [channels]`, and
    /// [`VolumeError::EmptyChannelAxis`] when the channel axis has width 0.
    pub fn from_array(array: &ArrayD<f32>, spatial: &[usize]) -> Result<Self, VolumeError> {
        let shape = array.shape();
        let channels = if shape == spatial {
            1
        } else if shape.len() == spatial.len() + 1 && &shape[..spatial.len()] == spatial {
            match shape[spatial.len()] {
                0 => return Err(VolumeError::EmptyChannelAxis),
                channels => channels,
            }
        } else {
            return Err(VolumeError::ShapeMismatch {
                expected: spatial.to_vec(),
                got: shape.to_vec(),
            });
        };
        let grid = Grid::from_shape(spatial)?;
        let data = array.iter().copied().collect();
        Ok(Self {
            grid,
            channels,
            data,
        })
    }

    /// Returns the number of channels per voxel.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns all channel values at a linear spatial index.
    #[must_use]
    pub fn value(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Returns the boundary-channel value at a linear spatial index.
    #[must_use]
    pub fn scalar(&self, index: usize) -> f32 {
        self.data[index * self.channels]
    }

    /// Returns the spatial shape the map was validated against.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(Connectivity::Faces, 2, 2)]
    #[case(Connectivity::Faces, 3, 3)]
    #[case(Connectivity::Full, 2, 4)]
    #[case(Connectivity::Full, 3, 13)]
    fn forward_offsets_visit_each_pair_once(
        #[case] connectivity: Connectivity,
        #[case] ndim: usize,
        #[case] expected: usize,
    ) {
        let offsets = connectivity.forward_offsets(ndim);
        assert_eq!(offsets.len(), expected);
        for offset in &offsets {
            let first = offset.iter().find(|&&component| component != 0);
            assert_eq!(first.copied(), Some(1), "offset {offset:?} is not forward");
        }
    }

    #[test]
    fn all_offsets_doubles_forward_set() {
        let forward = Connectivity::Full.forward_offsets(3);
        let all = Connectivity::Full.all_offsets(3);
        assert_eq!(all.len(), forward.len() * 2);
        assert_eq!(all.len(), 26);
    }

    #[test]
    fn grid_round_trips_indices() {
        let grid = Grid::from_shape(&[2, 3, 4]).expect("shape is non-empty");
        let mut coords = [0_usize; 3];
        for index in 0..grid.len() {
            grid.decode_into(index, &mut coords);
            let recoded = grid
                .offset_index(&coords, &[0, 0, 0])
                .expect("zero offset stays inside the grid");
            assert_eq!(recoded, index);
        }
    }

    #[test]
    fn grid_offsets_respect_bounds() {
        let grid = Grid::from_shape(&[2, 2]).expect("shape is non-empty");
        let mut coords = [0_usize; 2];
        grid.decode_into(3, &mut coords);
        assert_eq!(coords, [1, 1]);
        assert_eq!(grid.offset_index(&coords, &[0, 1]), None);
        assert_eq!(grid.offset_index(&coords, &[-1, 0]), Some(1));
    }

    #[test]
    fn label_volume_rejects_empty() {
        let array = ArrayD::<u32>::zeros(IxDyn(&[0, 4]));
        let err = LabelVolume::from_array(&array).expect_err("empty volumes are invalid");
        assert_eq!(err, VolumeError::EmptyVolume);
    }

    #[test]
    fn label_volume_round_trips() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1_u32, 2, 3, 4])
            .expect("shape matches data");
        let volume = LabelVolume::from_array(&array).expect("volume is valid");
        assert_eq!(volume.label(2), 3);
        assert_eq!(volume.max_label(), 4);
        assert_eq!(volume.to_array(), array);
    }

    #[test]
    fn probability_map_detects_channel_axis() {
        let spatial = [2, 2];
        let flat = ArrayD::from_shape_vec(IxDyn(&spatial), vec![0.1_f32, 0.2, 0.3, 0.4])
            .expect("shape matches data");
        let map = ProbabilityMap::from_array(&flat, &spatial).expect("flat map is valid");
        assert_eq!(map.channels(), 1);
        assert_eq!(map.scalar(3), 0.4);

        let chans =
            ArrayD::from_shape_vec(IxDyn(&[2, 2, 2]), vec![0.1_f32, 0.9, 0.2, 0.8, 0.3, 0.7, 0.4, 0.6])
                .expect("shape matches data");
        let map = ProbabilityMap::from_array(&chans, &spatial).expect("channelled map is valid");
        assert_eq!(map.channels(), 2);
        assert_eq!(map.scalar(1), 0.2);
        assert_eq!(map.value(1), [0.2, 0.8]);
    }

    #[test]
    fn probability_map_rejects_foreign_shapes() {
        let spatial = [2, 2];
        let wrong = ArrayD::<f32>::zeros(IxDyn(&[3, 2]));
        let err = ProbabilityMap::from_array(&wrong, &spatial).expect_err("shape must match");
        assert!(matches!(err, VolumeError::ShapeMismatch { .. }));

        let zero_channels = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 0]));
        let err = ProbabilityMap::from_array(&zero_channels, &spatial)
            .expect_err("zero-width channels are invalid");
        assert_eq!(err, VolumeError::EmptyChannelAxis);
    }
}
