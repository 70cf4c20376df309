//! Workspace bundles: named scratch regions packed into one allocation.

use crate::error::{ConvError, ConvResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceRegion {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// Ordered scratch regions. Regions are laid back to back with no padding,
/// so the total is exactly the sum of the region sizes.
///
/// A bundle is recomputed from the problem descriptor on every query and
/// never outlives the call that built it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceBundle {
    regions: Vec<WorkspaceRegion>,
}

impl WorkspaceBundle {
    pub fn new(regions: &[(&'static str, usize)]) -> Self {
        let mut offset = 0;
        let regions = regions
            .iter()
            .map(|&(name, size)| {
                let region = WorkspaceRegion { name, offset, size };
                offset += size;
                region
            })
            .collect();
        Self { regions }
    }

    pub fn nr_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[WorkspaceRegion] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Option<&WorkspaceRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn get_size(&self, index: usize) -> usize {
        self.regions.get(index).map_or(0, |r| r.size)
    }

    pub fn total_size_in_bytes(&self) -> usize {
        self.regions.iter().map(|r| r.size).sum()
    }

    /// Split `raw` into one disjoint mutable slice per region.
    pub fn split_mut<'a>(&self, raw: &'a mut [u8]) -> ConvResult<Vec<&'a mut [u8]>> {
        let required = self.total_size_in_bytes();
        if raw.len() < required {
            return Err(ConvError::WorkspaceTooSmall {
                required,
                provided: raw.len(),
            });
        }
        let mut rest = raw;
        let mut out = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(region.size);
            out.push(head);
            rest = tail;
        }
        Ok(out)
    }
}
