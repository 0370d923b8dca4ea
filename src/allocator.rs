//! Free cluster search
//!
//! The search cursor survives across allocations within a mount session,
//! so a long sequence of small allocations never rescans the volume from
//! cluster 2. Free space itself is looked up through [`ClusterMap`], which
//! is the FAT for FAT12/16/32 and the allocation bitmap for exFAT.

use core::fmt::Debug;

use crate::error::Error;
use crate::types::ClusterID;

pub(crate) trait ClusterMap {
    type Error: Debug;

    fn is_free(&mut self, cluster: ClusterID) -> Result<bool, Error<Self::Error>>;

    /// Lowest free cluster within `from..=to`
    fn find_free(
        &mut self,
        from: ClusterID,
        to: ClusterID,
    ) -> Result<Option<ClusterID>, Error<Self::Error>> {
        let mut cluster = from;
        while cluster <= to {
            if self.is_free(cluster)? {
                return Ok(Some(cluster));
            }
            cluster += 1u32;
        }
        Ok(None)
    }

    fn count_free(&mut self) -> Result<u32, Error<Self::Error>>;
}

#[derive(Clone, Debug)]
pub(crate) struct Allocator {
    cursor: ClusterID,
    free: Option<u32>,
    last: ClusterID,
}

impl Allocator {
    pub fn new(cluster_count: u32, hint: Option<ClusterID>) -> Self {
        let last = ClusterID::FIRST + (cluster_count - 1);
        let cursor = hint.filter(|&cluster| cluster.valid() && cluster <= last);
        Self { cursor: cursor.unwrap_or(ClusterID::FIRST), free: None, last }
    }

    pub fn cursor(&self) -> ClusterID {
        self.cursor
    }

    /// Cached free cluster count, None if unknown
    pub fn free(&self) -> Option<u32> {
        self.free
    }

    fn cluster_count(&self) -> u32 {
        self.last - ClusterID::FIRST + 1
    }

    /// `prev + 1` if free, otherwise the first free cluster from cursor, wrapping once
    pub fn find<M: ClusterMap>(
        &mut self,
        map: &mut M,
        prev: Option<ClusterID>,
    ) -> Result<ClusterID, Error<M::Error>> {
        if self.free == Some(0) {
            return Err(Error::DiskFull);
        }
        if let Some(next) = prev.map(|prev| prev + 1u32).filter(|&next| next <= self.last) {
            if next.valid() && map.is_free(next)? {
                return Ok(next);
            }
        }
        if let Some(cluster) = map.find_free(self.cursor, self.last)? {
            return Ok(cluster);
        }
        if self.cursor > ClusterID::FIRST {
            if let Some(cluster) = map.find_free(ClusterID::FIRST, self.cursor)? {
                return Ok(cluster);
            }
        }
        if self.free.is_some() {
            warn!("Free cluster counter {:?} out of sync, reset to 0", self.free);
        }
        self.free = Some(0);
        Err(Error::DiskFull)
    }

    fn find_run_within<M: ClusterMap>(
        map: &mut M,
        from: ClusterID,
        to: ClusterID,
        count: u32,
    ) -> Result<Option<ClusterID>, Error<M::Error>> {
        let mut from = from;
        while from <= to {
            let first = match map.find_free(from, to)? {
                Some(cluster) => cluster,
                None => return Ok(None),
            };
            if to - first + 1 < count {
                return Ok(None);
            }
            let mut length = 1;
            while length < count && map.is_free(first + length)? {
                length += 1;
            }
            if length == count {
                return Ok(Some(first));
            }
            from = first + length + 1u32;
        }
        Ok(None)
    }

    /// Lowest run of `count` free clusters from cursor, then from cluster 2
    pub fn find_run<M: ClusterMap>(
        &mut self,
        map: &mut M,
        count: u32,
    ) -> Result<ClusterID, Error<M::Error>> {
        let short = self.free.is_some_and(|free| free < count);
        if count == 0 || count > self.cluster_count() || short {
            return Err(Error::DiskFull);
        }
        if let Some(first) = Self::find_run_within(map, self.cursor, self.last, count)? {
            return Ok(first);
        }
        match Self::find_run_within(map, ClusterID::FIRST, self.last, count)? {
            Some(first) => Ok(first),
            None => Err(Error::DiskFull),
        }
    }

    /// Cluster taken by caller
    pub fn commit(&mut self, cluster: ClusterID) {
        trace!("Cluster {} allocated", cluster);
        self.free = match self.free.map(|free| free.checked_sub(1)) {
            Some(None) => {
                warn!("Free cluster counter underflow, recount required");
                None
            }
            Some(free) => free,
            None => None,
        };
        self.cursor = match cluster < self.last {
            true => cluster + 1u32,
            false => ClusterID::FIRST,
        };
    }

    /// Cluster given back by caller
    pub fn release(&mut self, cluster: ClusterID) {
        trace!("Cluster {} released", cluster);
        let cluster_count = self.cluster_count();
        self.free = match self.free.map(|free| free + 1) {
            Some(free) if free > cluster_count => {
                warn!("Free cluster counter overflow, recount required");
                None
            }
            free => free,
        };
        if cluster < self.cursor {
            self.cursor = cluster;
        }
    }

    pub fn free_count<M: ClusterMap>(&mut self, map: &mut M) -> Result<u32, Error<M::Error>> {
        if let Some(free) = self.free {
            return Ok(free);
        }
        let free = map.count_free()?;
        debug!("Free clusters recounted: {}", free);
        self.free = Some(free);
        Ok(free)
    }

    /// Forget cached counter, next query rescans
    pub fn invalidate(&mut self) {
        self.free = None;
    }
}
