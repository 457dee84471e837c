use super::MembraneLattice;
use crate::{Cell, CellLayer, RegularLattice, SimulationContext};
use cellpotts_concepts::*;

use nalgebra::Matrix3;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;

/// Distance assigned to membrane nodes which were not reached by any sample.
pub const NO_DISTANCE: f64 = 999999.0;

/// Minimal improvement for a node to adopt the value of a neighbor.
const RELAXATION_TOLERANCE: f64 = 1e-5;

/// How reported values are combined and interpolated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingMode {
    /// Values can not be interpolated. Concurrent values are chosen by chance.
    Discrete,
    /// Values are 0 or 1. The majority wins, ties are decided by chance.
    Boolean,
    /// Values are averaged and interpolated.
    Continuous,
    /// Like [MappingMode::Boolean] but reports the distance to the nearest node with value 1.
    DistanceTransform,
}

/// Projects scattered samples around a center onto a [MembraneLattice].
///
/// The mapper keeps three layers: the accumulated values, the number of samples per
/// node and the distance of every node to the nearest sampled node.
/// Usage follows the pattern
/// 1. [attach_to_center](MembraneMapper::attach_to_center) or
///    [attach_to_cell](MembraneMapper::attach_to_cell)
/// 2. [map](MembraneMapper::map) all samples
/// 3. [fill_gaps](MembraneMapper::fill_gaps)
///
/// ```
/// # use cellpotts_building_blocks::*;
/// # use cellpotts_concepts::OrthPos;
/// let lattice = RegularLattice::square(50, 50, [true, true])?;
/// let context = SimulationContext::new(lattice).with_membrane_resolution(8);
/// let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context)?;
/// mapper.attach_to_center(OrthPos::new(25.0, 25.0, 0.0));
/// mapper.map(&OrthPos::new(30.0, 25.0, 0.0), 2.0)?;
/// mapper.fill_gaps();
/// assert!(mapper.data().data().iter().all(|v| *v == 2.0));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct MembraneMapper {
    mode: MappingMode,
    use_shape: bool,
    lattice: RegularLattice,
    center: Option<OrthPos>,
    cell_nodes: usize,
    shape: Option<MembraneLattice>,
    data: MembraneLattice,
    accum: MembraneLattice,
    distance: MembraneLattice,
    rotations: Vec<Matrix3<f64>>,
    rng: rand_chacha::ChaCha8Rng,
}

impl MembraneMapper {
    /// Mapper with a membrane lattice of the resolution given by the context.
    ///
    /// With `use_shape` enabled the distance transform measures distances over the
    /// spherical approximation of the attached cell instead of a sphere of equal volume.
    pub fn new(
        mode: MappingMode,
        use_shape: bool,
        context: &SimulationContext,
    ) -> Result<Self, SetupError> {
        let data = MembraneLattice::new(
            context.membrane_resolution,
            context.membrane_dimensions(),
        )?;
        let mut distance = data.clone();
        distance.fill(NO_DISTANCE);
        Ok(Self {
            mode,
            use_shape,
            lattice: context.lattice.clone(),
            center: None,
            cell_nodes: 0,
            shape: None,
            accum: data.clone(),
            data,
            distance,
            rotations: Vec::new(),
            rng: rand_chacha::ChaCha8Rng::seed_from_u64(context.seed),
        })
    }

    /// Active mapping mode.
    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    fn reset(&mut self, center: OrthPos) {
        self.center = Some(center);
        self.data.fill(0.0);
        self.accum.fill(0.0);
        self.distance.fill(NO_DISTANCE);
    }

    /// Center the mapper at the centroid of a cell. Discards all mapped values.
    pub fn attach_to_cell(&mut self, cell: &Cell, layer: &CellLayer) -> Result<(), SetupError> {
        self.reset(cell.center());
        self.cell_nodes = cell.n_nodes();
        self.shape = match self.use_shape {
            true => Some(cell.shape().spherical_approx(layer)?.clone()),
            false => None,
        };
        Ok(())
    }

    /// Center the mapper at an arbitrary point. Discards all mapped values.
    pub fn attach_to_center(&mut self, center: OrthPos) {
        self.reset(center);
        self.cell_nodes = 0;
        self.shape = None;
    }

    /// Add a rotation which is applied to every sample before its projection.
    ///
    /// Rotations are applied in the order they were registered.
    pub fn set_rotation_matrix(&mut self, rotation: Matrix3<f64>) {
        self.rotations.push(rotation);
    }

    /// Remove all rotations.
    pub fn reset_rotation_matrices(&mut self) {
        self.rotations.clear();
    }

    /// Membrane node onto which a point in orthogonal space is projected.
    pub fn membrane_position(&self, pos: &OrthPos) -> Result<[usize; 2], CalcError> {
        let center = self
            .center
            .ok_or_else(|| CalcError("membrane mapper is not attached".to_owned()))?;
        let orientation = self
            .rotations
            .iter()
            .fold(self.lattice.orth_distance(pos, &center), |o, r| r * o);
        let [lx, ly] = self.data.size();
        let (lx, ly) = (lx as f64, ly as f64);
        let phi = orientation.y.atan2(orientation.x);
        let x = (phi * lx / (2.0 * PI)).rem_euclid(lx);
        let y = match self.data.dimensions() {
            1 => 0.0,
            _ => {
                let r = orientation.norm();
                let theta = match r > 0.0 {
                    true => (orientation.z / r).clamp(-1.0, 1.0).acos(),
                    false => 0.5 * PI,
                };
                theta * ly / PI
            }
        };
        Ok([
            (x.floor() as usize).min(lx as usize - 1),
            (y.floor() as usize).min(ly as usize - 1),
        ])
    }

    /// Project a lattice node and report `value` there.
    pub fn map_node(&mut self, pos: &NodePos, value: f64) -> Result<(), CalcError> {
        let orth = self.lattice.node_to_orth(pos);
        self.map(&orth, value)
    }

    /// Project a point in orthogonal space and report `value` there.
    pub fn map(&mut self, pos: &OrthPos, value: f64) -> Result<(), CalcError> {
        let node = self.membrane_position(pos)?;
        self.set(node, value);
        Ok(())
    }

    /// Report `value` directly at a membrane node.
    pub fn set(&mut self, node: [usize; 2], value: f64) {
        let index = self.data.index(node);
        match self.mode {
            MappingMode::Discrete => {
                self.data.data_mut()[index] = value;
                self.accum.data_mut()[index] = 1.0;
            }
            _ => {
                self.data.data_mut()[index] += value;
                self.accum.data_mut()[index] += 1.0;
            }
        }
        self.distance.data_mut()[index] = 0.0;
    }

    fn is_binary(&self) -> bool {
        matches!(
            self.mode,
            MappingMode::Boolean | MappingMode::DistanceTransform
        )
    }

    fn random_bool(&mut self) -> f64 {
        match self.rng.gen_bool(0.5) {
            true => 1.0,
            false => 0.0,
        }
    }

    fn normalize(&mut self) {
        for index in 0..self.data.len() {
            let accum = self.accum.data()[index];
            if accum == 0.0 {
                continue;
            }
            let average = self.data.data()[index] / accum;
            let value = match self.is_binary() {
                true if average == 0.5 => self.random_bool(),
                true => (average > 0.5) as u8 as f64,
                false => average,
            };
            self.data.data_mut()[index] = value;
            self.accum.data_mut()[index] = 1.0;
        }
    }

    /// Normalize all reported values and interpolate them into unreported nodes.
    ///
    /// Every unreported node receives the value of its nearest reported node.
    /// In [MappingMode::DistanceTransform] the distances are computed afterwards.
    pub fn fill_gaps(&mut self) {
        self.normalize();
        match self.data.dimensions() {
            1 => self.fill_gaps_ring(),
            _ => self.fill_gaps_sphere(),
        }
        if self.mode == MappingMode::DistanceTransform {
            self.compute_distance();
        }
    }

    fn fill_gaps_ring(&mut self) {
        let length = self.data.len();
        let mut forward = true;
        let mut done = false;
        while !done {
            done = true;
            for step in 0..length {
                let index = if forward { step } else { length - 1 - step };
                let left = (index + length - 1) % length;
                let right = (index + 1) % length;
                let distance = self.distance.data();
                let (d_left, d_right) = (distance[left], distance[right]);
                if d_left + 1.0 >= distance[index] && d_right + 1.0 >= distance[index] {
                    continue;
                }
                let (v_left, v_right) = (self.data.data()[left], self.data.data()[right]);
                let (value, new_distance) = if d_left < d_right {
                    (v_left, d_left + 1.0)
                } else if d_left > d_right {
                    (v_right, d_right + 1.0)
                } else {
                    let value = match self.mode {
                        MappingMode::Discrete => match self.rng.gen_bool(0.5) {
                            true => v_left,
                            false => v_right,
                        },
                        MappingMode::Boolean | MappingMode::DistanceTransform => {
                            if v_left + v_right == 1.0 {
                                self.random_bool()
                            } else {
                                (v_left + v_right > 1.0) as u8 as f64
                            }
                        }
                        MappingMode::Continuous => 0.5 * (v_left + v_right),
                    };
                    (value, d_right + 1.0)
                };
                self.data.data_mut()[index] = value;
                self.distance.data_mut()[index] = new_distance;
                done = false;
            }
            forward = !forward;
        }
    }

    /// Offsets of the second order neighborhood of the spherical membrane lattice.
    fn sphere_neighbors() -> impl Iterator<Item = (i64, i64)> {
        itertools::iproduct!(-1i64..=1, -1i64..=1).filter(|offset| *offset != (0, 0))
    }

    /// Distance between nodes of row `y` in units of the lattice spacing.
    ///
    /// Rows at the poles collapse to a single point along $\varphi$.
    fn row_spacing(&self, y: usize) -> f64 {
        let ly = self.data.size()[1];
        if y == 0 || y + 1 == ly {
            0.0
        } else {
            self.data.node_size(y)
        }
    }

    fn fill_gaps_sphere(&mut self) {
        let [lx, ly] = self.data.size();
        let mut forward = true;
        let mut done = false;
        while !done {
            done = true;
            for y_step in 0..ly {
                let y = if forward { y_step } else { ly - 1 - y_step };
                let spacing = self.row_spacing(y);
                for x_step in 0..lx {
                    let x = if forward { x_step } else { lx - 1 - x_step };
                    let index = self.data.index([x, y]);
                    let mut min_dist = self.distance.data()[index];
                    let mut candidates = Vec::new();
                    for (dx, dy) in Self::sphere_neighbors() {
                        let Some(neighbor) = self.data.neighbor_index([x, y], dx, dy) else {
                            continue;
                        };
                        let step = ((dx as f64 * spacing).powi(2) + (dy as f64).powi(2)).sqrt();
                        let dist = self.distance.data()[neighbor] + step;
                        if dist < min_dist {
                            min_dist = dist;
                            candidates.clear();
                            candidates.push(self.data.data()[neighbor]);
                        } else if dist == min_dist {
                            candidates.push(self.data.data()[neighbor]);
                        }
                    }
                    if candidates.is_empty()
                        || min_dist - self.distance.data()[index] >= -RELAXATION_TOLERANCE
                    {
                        continue;
                    }
                    let n = candidates.len() as f64;
                    let average = candidates.iter().sum::<f64>() / n;
                    let value = match self.mode {
                        MappingMode::Discrete => candidates[self.rng.gen_range(0..candidates.len())],
                        MappingMode::Boolean | MappingMode::DistanceTransform => {
                            if average == 0.5 {
                                self.random_bool()
                            } else {
                                (average > 0.5) as u8 as f64
                            }
                        }
                        MappingMode::Continuous => average,
                    };
                    self.data.data_mut()[index] = value;
                    self.distance.data_mut()[index] = min_dist;
                    done = false;
                }
            }
            forward = !forward;
        }
    }

    /// Radius of a sphere (or circle) with the volume of the attached cell.
    ///
    /// Mappers attached to a plain center measure on the unit sphere.
    fn spherical_radius(&self) -> f64 {
        if self.cell_nodes == 0 {
            return 1.0;
        }
        let n = self.cell_nodes as f64;
        match self.data.dimensions() {
            1 => (n / PI).sqrt(),
            _ => (n / (4.0 / 3.0 * PI)).cbrt(),
        }
    }

    /// Distance of every node to the nearest node with a nonzero value.
    ///
    /// Distances are measured over the attached cell shape if available, else over a
    /// sphere of equal volume.
    fn compute_distance(&mut self) {
        let radius = self.spherical_radius();
        for index in 0..self.data.len() {
            self.distance.data_mut()[index] = match self.data.data()[index] != 0.0 {
                true => 0.0,
                false => NO_DISTANCE,
            };
        }
        let [lx, ly] = self.data.size();
        let angular_step = 2.0 * PI / lx as f64;
        let offsets: Vec<(i64, i64)> = match self.data.dimensions() {
            1 => vec![(-1, 0), (1, 0)],
            _ => Self::sphere_neighbors().collect(),
        };
        let mut direction = 0;
        let mut done = false;
        while !done {
            done = true;
            let x_forward = direction == 0 || direction == 3;
            let y_forward = direction == 0 || direction == 2;
            for y_step in 0..ly {
                let y = if y_forward { y_step } else { ly - 1 - y_step };
                let spacing = match self.data.dimensions() {
                    1 => 1.0,
                    _ => self.row_spacing(y),
                };
                for x_step in 0..lx {
                    let x = if x_forward { x_step } else { lx - 1 - x_step };
                    let index = self.data.index([x, y]);
                    let mut min_dist = self.distance.data()[index];
                    for &(dx, dy) in offsets.iter() {
                        let Some(neighbor) = self.data.neighbor_index([x, y], dx, dy) else {
                            continue;
                        };
                        let base = self.distance.data()[neighbor];
                        if base == NO_DISTANCE {
                            continue;
                        }
                        let step = ((dx as f64 * spacing).powi(2) + (dy as f64).powi(2)).sqrt()
                            * angular_step;
                        let dist = base
                            + match &self.shape {
                                Some(shape) => {
                                    let (si, sj) = (shape.data()[index], shape.data()[neighbor]);
                                    ((step * si.min(sj)).powi(2) + (si - sj).powi(2)).sqrt()
                                }
                                None => step * radius,
                            };
                        min_dist = min_dist.min(dist);
                    }
                    if min_dist - self.distance.data()[index] < -RELAXATION_TOLERANCE {
                        self.distance.data_mut()[index] = min_dist;
                        done = false;
                    }
                }
            }
            direction = (direction + 1) % 4;
        }
    }

    /// Smooth the mapped values with one diffusion step. Only affects continuous data.
    pub fn flatten(&mut self) {
        if self.mode == MappingMode::Continuous {
            self.data.diffuse(0.1, 1.0);
        }
    }

    /// Mapped values, or the distances in [MappingMode::DistanceTransform].
    pub fn data(&self) -> &MembraneLattice {
        match self.mode {
            MappingMode::DistanceTransform => &self.distance,
            _ => &self.data,
        }
    }

    /// Number of samples per node.
    pub fn accum(&self) -> &MembraneLattice {
        &self.accum
    }

    /// Distance of every node to the nearest sampled node.
    pub fn distance(&self) -> &MembraneLattice {
        &self.distance
    }

    fn check_size(&self, membrane: &MembraneLattice) -> Result<(), IndexError> {
        if membrane.size() != self.data.size() {
            return Err(IndexError(format!(
                "membrane of size {:?} does not match mapper of size {:?}",
                membrane.size(),
                self.data.size()
            )));
        }
        Ok(())
    }

    /// Copy [MembraneMapper::data] into `membrane`.
    pub fn copy_data(&self, membrane: &mut MembraneLattice) -> Result<(), IndexError> {
        if self.mode == MappingMode::DistanceTransform {
            return self.copy_distance(membrane);
        }
        self.check_size(membrane)?;
        membrane.data_mut().copy_from_slice(self.data.data());
        Ok(())
    }

    /// Copy [MembraneMapper::accum] into `membrane`.
    pub fn copy_accum(&self, membrane: &mut MembraneLattice) -> Result<(), IndexError> {
        self.check_size(membrane)?;
        membrane.data_mut().copy_from_slice(self.accum.data());
        Ok(())
    }

    /// Copy [MembraneMapper::distance] into `membrane`, reporting unreached nodes as 0.
    pub fn copy_distance(&self, membrane: &mut MembraneLattice) -> Result<(), IndexError> {
        self.check_size(membrane)?;
        for (target, &d) in membrane.data_mut().iter_mut().zip(self.distance.data()) {
            *target = if d == NO_DISTANCE { 0.0 } else { d };
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mapping_mode_tokens() {
        use serde_test::{assert_tokens, Token};
        assert_tokens(
            &MappingMode::DistanceTransform,
            &[Token::UnitVariant {
                name: "MappingMode",
                variant: "DistanceTransform",
            }],
        );
    }

    fn context(dimensions: usize, resolution: usize) -> SimulationContext {
        let lattice = match dimensions {
            2 => RegularLattice::square(100, 100, [true, true]),
            _ => RegularLattice::cubic(60, 60, 60, [true; 3]),
        }
        .unwrap();
        SimulationContext::new(lattice)
            .with_membrane_resolution(resolution)
            .with_seed(3)
    }

    #[test]
    fn ring_positions() {
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(2, 8)).unwrap();
        assert!(mapper.map(&OrthPos::new(1.0, 1.0, 0.0), 1.0).is_err());
        mapper.attach_to_center(OrthPos::new(50.0, 50.0, 0.0));
        let east = mapper.membrane_position(&OrthPos::new(60.0, 50.0, 0.0)).unwrap();
        let north = mapper.membrane_position(&OrthPos::new(50.0, 60.0, 0.0)).unwrap();
        let south = mapper.membrane_position(&OrthPos::new(50.0, 40.0, 0.0)).unwrap();
        assert_eq!(east, [0, 0]);
        assert_eq!(north, [2, 0]);
        assert_eq!(south, [6, 0]);
    }

    #[test]
    fn rotation_is_applied() {
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(2, 8)).unwrap();
        mapper.attach_to_center(OrthPos::new(50.0, 50.0, 0.0));
        mapper.set_rotation_matrix(Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0));
        let east = mapper.membrane_position(&OrthPos::new(60.0, 50.0, 0.0)).unwrap();
        assert_eq!(east, [2, 0]);
        mapper.reset_rotation_matrices();
        let east = mapper.membrane_position(&OrthPos::new(60.0, 50.0, 0.0)).unwrap();
        assert_eq!(east, [0, 0]);
    }

    #[test]
    fn sphere_poles() {
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(3, 20)).unwrap();
        mapper.attach_to_center(OrthPos::new(30.0, 30.0, 30.0));
        let top = mapper.membrane_position(&OrthPos::new(30.0, 30.0, 35.0)).unwrap();
        let bottom = mapper.membrane_position(&OrthPos::new(30.0, 30.0, 25.0)).unwrap();
        assert_eq!(top[1], 0);
        assert_eq!(bottom[1], 9);
    }

    #[test]
    fn ring_gap_filling_takes_nearest() {
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(2, 10)).unwrap();
        mapper.attach_to_center(OrthPos::zeros());
        mapper.set([0, 0], 1.0);
        mapper.set([0, 0], 3.0);
        mapper.set([5, 0], 10.0);
        mapper.fill_gaps();
        let data = mapper.data().data();
        assert_eq!(data[0], 2.0);
        assert_eq!(data[1], 2.0);
        assert_eq!(data[4], 10.0);
        assert_eq!(data[9], 2.0);
        assert_eq!(mapper.distance().data()[2], 2.0);
    }

    #[test]
    fn discrete_mode_overwrites() {
        let mut mapper = MembraneMapper::new(MappingMode::Discrete, false, &context(2, 10)).unwrap();
        mapper.attach_to_center(OrthPos::zeros());
        mapper.set([3, 0], 4.0);
        mapper.set([3, 0], 7.0);
        assert_eq!(mapper.accum().data()[3], 1.0);
        mapper.fill_gaps();
        assert!(mapper.data().data().iter().all(|v| *v == 7.0));
    }

    #[test]
    fn sphere_fill_is_idempotent() {
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(3, 16)).unwrap();
        mapper.attach_to_center(OrthPos::zeros());
        mapper.set([0, 2], 1.0);
        mapper.set([8, 5], 5.0);
        mapper.set([12, 7], 3.0);
        mapper.fill_gaps();
        let first = mapper.data().clone();
        let first_distance = mapper.distance().clone();
        assert!(first_distance.data().iter().all(|d| *d < NO_DISTANCE));
        mapper.fill_gaps();
        assert_eq!(&first, mapper.data());
        assert_eq!(&first_distance, mapper.distance());
    }

    #[test]
    fn distance_transform_reports_unreached_as_zero() {
        let mut mapper =
            MembraneMapper::new(MappingMode::DistanceTransform, false, &context(3, 16)).unwrap();
        mapper.attach_to_center(OrthPos::zeros());
        mapper.set([4, 3], 0.0);
        mapper.fill_gaps();
        let mut target = MembraneLattice::new(16, 2).unwrap();
        target.fill(5.0);
        mapper.copy_distance(&mut target).unwrap();
        assert!(target.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn distance_transform_grows_from_source() {
        let mut mapper =
            MembraneMapper::new(MappingMode::DistanceTransform, false, &context(3, 16)).unwrap();
        mapper.attach_to_center(OrthPos::zeros());
        mapper.set([4, 4], 1.0);
        mapper.set([12, 4], 0.0);
        mapper.fill_gaps();
        let distance = mapper.data();
        assert_eq!(distance.get([4, 4]), 0.0);
        assert!(distance.get([10, 4]) > 0.0);
        assert!(distance.get([12, 4]) > distance.get([10, 4]));
        assert!(distance.data().iter().all(|d| *d < NO_DISTANCE));
    }

    #[test]
    fn copy_checks_size() {
        let mapper = MembraneMapper::new(MappingMode::Continuous, false, &context(2, 10)).unwrap();
        let mut wrong = MembraneLattice::new(12, 1).unwrap();
        assert!(mapper.copy_data(&mut wrong).is_err());
    }
}
