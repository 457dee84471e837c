use cellpotts_concepts::SetupError;
use serde::{Deserialize, Serialize};

/// Dense scalar field on the angular lattice attached to a cell.
///
/// In one dimension the lattice is a ring of `r` nodes, parametrized by the polar
/// angle $\varphi$. In two dimensions it spans the sphere with $2\lfloor r/2\rfloor$
/// nodes along $\varphi\in[0,2\pi)$ and $\lfloor r/2\rfloor$ nodes along
/// $\theta\in[0,\pi]$. The $\varphi$ axis is periodic while the poles bound the
/// $\theta$ axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembraneLattice {
    size: [usize; 2],
    dimensions: usize,
    data: Vec<f64>,
}

impl MembraneLattice {
    /// Membrane of the given resolution and dimension filled with zeros.
    pub fn new(resolution: usize, dimensions: usize) -> Result<Self, SetupError> {
        let size = match dimensions {
            1 => [resolution, 1],
            2 => {
                let y = resolution / 2;
                [2 * y, y]
            }
            _ => {
                return Err(SetupError(format!(
                    "membrane lattices are 1- or 2-dimensional, got {dimensions}"
                )))
            }
        };
        if size[0] == 0 || size[1] == 0 {
            return Err(SetupError(format!(
                "membrane resolution {resolution} is too small for dimension {dimensions}"
            )));
        }
        Ok(Self {
            size,
            dimensions,
            data: vec![0.0; size[0] * size[1]],
        })
    }

    /// Number of nodes along $\varphi$ and $\theta$.
    pub fn size(&self) -> [usize; 2] {
        self.size
    }

    /// 1 for a ring, 2 for a sphere.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Does the lattice contain no nodes?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of node `[x, y]`.
    pub fn index(&self, node: [usize; 2]) -> usize {
        node[0] + self.size[0] * node[1]
    }

    /// Node `[x, y]` of a flat index.
    pub fn node(&self, index: usize) -> [usize; 2] {
        [index % self.size[0], index / self.size[0]]
    }

    /// Index of the neighbor at offset `(dx, dy)`, wrapping $\varphi$.
    ///
    /// Returns [None] when the offset leaves the lattice across a pole.
    pub fn neighbor_index(&self, node: [usize; 2], dx: i64, dy: i64) -> Option<usize> {
        let y = node[1] as i64 + dy;
        if y < 0 || y >= self.size[1] as i64 {
            return None;
        }
        let x = (node[0] as i64 + dx).rem_euclid(self.size[0] as i64);
        Some(self.index([x as usize, y as usize]))
    }

    /// Colatitude of row `y`.
    pub fn theta(&self, y: usize) -> f64 {
        (y as f64 + 0.5) / self.size[1] as f64 * std::f64::consts::PI
    }

    /// Relative size of a node in row `y`.
    ///
    /// Rows close to the poles cover a smaller area, scaling as $\sin\theta$.
    pub fn node_size(&self, y: usize) -> f64 {
        match self.dimensions {
            1 => 1.0,
            _ => self.theta(y).sin(),
        }
    }

    /// All values in index order.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable access to all values.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Value at node `[x, y]`.
    pub fn get(&self, node: [usize; 2]) -> f64 {
        self.data[self.index(node)]
    }

    /// Overwrite the value at node `[x, y]`.
    pub fn set(&mut self, node: [usize; 2], value: f64) {
        let index = self.index(node);
        self.data[index] = value;
    }

    /// Set every node to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Smallest value on the lattice.
    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Area weighted mean of all values.
    pub fn mean(&self) -> f64 {
        let (sum, weight) = self
            .data
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, weight), (index, value)| {
                let w = self.node_size(self.node(index)[1]);
                (sum + w * value, weight + w)
            });
        if weight > 0.0 {
            sum / weight
        } else {
            0.0
        }
    }

    /// One explicit diffusion step with rate `rate` and time step `dt`.
    ///
    /// The $\varphi$ axis is periodic, the poles are no-flux boundaries.
    pub fn diffuse(&mut self, rate: f64, dt: f64) {
        let previous = self.data.clone();
        for (index, value) in self.data.iter_mut().enumerate() {
            let node = [index % self.size[0], index / self.size[0]];
            let mut laplacian = 0.0;
            let offsets: &[(i64, i64)] = if self.dimensions == 1 {
                &[(-1, 0), (1, 0)]
            } else {
                &[(-1, 0), (1, 0), (0, -1), (0, 1)]
            };
            for &(dx, dy) in offsets {
                let y = node[1] as i64 + dy;
                if y < 0 || y >= self.size[1] as i64 {
                    continue;
                }
                let x = (node[0] as i64 + dx).rem_euclid(self.size[0] as i64) as usize;
                laplacian += previous[x + self.size[0] * y as usize] - previous[index];
            }
            *value += rate * dt * laplacian;
        }
    }
}
