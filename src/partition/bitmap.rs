use crate::allocator::ClusterMap;
use crate::cache::{Intent, SectorCache};
use crate::error::Error;
use crate::io::BlockDevice;
use crate::types::{ClusterID, SectorID};

/// exFAT allocation bitmap, one bit per cluster starting from cluster 2,
/// stored contiguously from its first cluster
#[derive(Copy, Clone, Debug)]
pub(crate) struct Bitmap {
    sector: SectorID,
    sector_size_shift: u8,
    cluster_count: u32,
}

impl Bitmap {
    pub fn new(sector: SectorID, sector_size_shift: u8, cluster_count: u32) -> Self {
        Self { sector, sector_size_shift, cluster_count }
    }

    fn locate(&self, cluster: ClusterID) -> (SectorID, usize, u8) {
        let bit = cluster.offset() as u64;
        let byte = bit / 8;
        let sector = self.sector + (byte >> self.sector_size_shift);
        let offset = (byte & ((1 << self.sector_size_shift) - 1)) as usize;
        (sector, offset, 1 << (bit % 8))
    }

    pub fn is_used<D: BlockDevice>(
        &self,
        cache: &mut SectorCache,
        io: &mut D,
        cluster: ClusterID,
    ) -> Result<bool, Error<D::Error>> {
        let (sector, offset, mask) = self.locate(cluster);
        Ok(cache.fetch(io, sector)?[offset] & mask != 0)
    }

    pub fn set<D: BlockDevice>(
        &self,
        cache: &mut SectorCache,
        io: &mut D,
        cluster: ClusterID,
        used: bool,
    ) -> Result<(), Error<D::Error>> {
        let (sector, offset, mask) = self.locate(cluster);
        let bytes = cache.fetch_mut(io, sector, Intent::Update)?;
        match used {
            true => bytes[offset] |= mask,
            false => bytes[offset] &= !mask,
        }
        Ok(())
    }

    pub fn count_free<D: BlockDevice>(
        &self,
        cache: &mut SectorCache,
        io: &mut D,
    ) -> Result<u32, Error<D::Error>> {
        let bits_per_sector = 8u32 << self.sector_size_shift;
        let mut used = 0;
        let mut remain = self.cluster_count;
        let mut sector = self.sector;
        while remain > 0 {
            let bytes = cache.fetch(io, sector)?;
            let bits = core::cmp::min(remain, bits_per_sector);
            let (full, tail) = ((bits / 8) as usize, bits % 8);
            used += bytes[..full].iter().map(|byte| byte.count_ones()).sum::<u32>();
            if tail > 0 {
                used += (bytes[full] & ((1u8 << tail) - 1)).count_ones();
            }
            remain -= bits;
            sector += 1u32;
        }
        Ok(self.cluster_count - used)
    }
}

pub(crate) struct BitmapMap<'a, D> {
    pub io: &'a mut D,
    pub cache: &'a mut SectorCache,
    pub bitmap: &'a Bitmap,
}

impl<'a, D: BlockDevice> ClusterMap for BitmapMap<'a, D> {
    type Error = D::Error;

    fn is_free(&mut self, cluster: ClusterID) -> Result<bool, Error<D::Error>> {
        Ok(!self.bitmap.is_used(self.cache, self.io, cluster)?)
    }

    /// Skips fully allocated bytes
    fn find_free(
        &mut self,
        from: ClusterID,
        to: ClusterID,
    ) -> Result<Option<ClusterID>, Error<D::Error>> {
        let mut cluster = from;
        while cluster <= to {
            let (sector, offset, mask) = self.bitmap.locate(cluster);
            let byte = self.cache.fetch(self.io, sector)?[offset];
            if byte == 0xFF && mask == 1 {
                cluster += 8u32;
                continue;
            }
            if byte & mask == 0 {
                return Ok(Some(cluster));
            }
            cluster += 1u32;
        }
        Ok(None)
    }

    fn count_free(&mut self) -> Result<u32, Error<D::Error>> {
        self.bitmap.count_free(self.cache, self.io)
    }
}
