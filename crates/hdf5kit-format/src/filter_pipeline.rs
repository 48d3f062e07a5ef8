//! HDF5 Filter Pipeline message (type 0x000B): the ordered list of filters
//! applied to every chunk of a dataset, in write order.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use crate::bytes::{pad8, ByteCursor, ByteWriter};
use crate::error::FormatError;

/// Well-known filter IDs.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;

/// Filter flag bit 0: the filter may be skipped if it fails on write.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// Description of a single filter in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    /// Filter identification value.
    pub filter_id: u16,
    /// Optional filter name (always stored for ids >= 256 in v2).
    pub name: Option<String>,
    /// Filter flags (bit 0 = optional).
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn new(filter_id: u16, client_data: Vec<u32>) -> Self {
        Self {
            filter_id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    pub fn deflate(level: u32) -> Self {
        Self::new(FILTER_DEFLATE, vec![level])
    }

    pub fn shuffle(element_size: u32) -> Self {
        Self::new(FILTER_SHUFFLE, vec![element_size])
    }

    pub fn fletcher32() -> Self {
        Self::new(FILTER_FLETCHER32, Vec::new())
    }

    pub fn optional(mut self) -> Self {
        self.flags |= FLAG_OPTIONAL;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// A filter pipeline consisting of one or more filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    /// Pipeline version (1 or 2).
    pub version: u8,
    /// Filters in the order they were applied on write.
    pub filters: Vec<FilterDescription>,
}

/// Read a name field, dropping the NUL terminator and anything after it.
fn read_name(c: &mut ByteCursor<'_>, len: usize) -> Result<String, FormatError> {
    let raw = c.take(len)?;
    let name = raw.split(|&b| b == 0).next().unwrap_or(raw);
    Ok(String::from_utf8_lossy(name).into_owned())
}

fn name_bytes(name: Option<&str>) -> Vec<u8> {
    let mut bytes = name.map(|n| n.as_bytes().to_vec()).unwrap_or_default();
    bytes.push(0);
    bytes
}

impl FilterPipeline {
    pub fn new(filters: Vec<FilterDescription>) -> Self {
        Self {
            version: 2,
            filters,
        }
    }

    /// Parse a filter pipeline message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<FilterPipeline, FormatError> {
        let mut c = ByteCursor::new(data);
        let version = c.u8()?;
        let number_of_filters = c.u8()? as usize;
        let filters = match version {
            1 => {
                c.skip(6)?;
                (0..number_of_filters)
                    .map(|_| Self::parse_v1_filter(&mut c))
                    .collect::<Result<Vec<_>, _>>()?
            }
            2 => (0..number_of_filters)
                .map(|_| Self::parse_v2_filter(&mut c))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(FormatError::InvalidFilterPipelineVersion(version)),
        };
        log::debug!(
            "filter pipeline v{version}: {:?}",
            filters.iter().map(|f| f.filter_id).collect::<Vec<_>>()
        );
        Ok(FilterPipeline { version, filters })
    }

    fn parse_v1_filter(c: &mut ByteCursor<'_>) -> Result<FilterDescription, FormatError> {
        let filter_id = c.u16()?;
        let name_length = c.u16()? as usize;
        let flags = c.u16()?;
        let num_client_data = c.u16()? as usize;
        let name = if name_length > 0 {
            let name = read_name(c, name_length)?;
            c.skip(pad8(name_length) - name_length)?;
            Some(name)
        } else {
            None
        };
        let client_data = (0..num_client_data)
            .map(|_| c.u32())
            .collect::<Result<Vec<_>, _>>()?;
        if num_client_data % 2 == 1 {
            c.skip(4)?;
        }
        Ok(FilterDescription {
            filter_id,
            name,
            flags,
            client_data,
        })
    }

    fn parse_v2_filter(c: &mut ByteCursor<'_>) -> Result<FilterDescription, FormatError> {
        let filter_id = c.u16()?;
        let name_length = if filter_id >= 256 { c.u16()? as usize } else { 0 };
        let flags = c.u16()?;
        let num_client_data = c.u16()? as usize;
        let name = if name_length > 0 {
            Some(read_name(c, name_length)?)
        } else {
            None
        };
        let client_data = (0..num_client_data)
            .map(|_| c.u32())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterDescription {
            filter_id,
            name,
            flags,
            client_data,
        })
    }

    /// Serialize in the pipeline's version (anything but 1 writes version 2).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if self.version == 1 {
            buf.put_u8(1);
            buf.put_u8(self.filters.len() as u8);
            buf.put_zeros(6);
            for f in &self.filters {
                let name = f.name.as_deref().map(|n| name_bytes(Some(n)));
                let name_len = name.as_ref().map_or(0, Vec::len);
                buf.put_u16(f.filter_id);
                buf.put_u16(pad8(name_len) as u16);
                buf.put_u16(f.flags);
                buf.put_u16(f.client_data.len() as u16);
                if let Some(name) = name {
                    buf.extend_from_slice(&name);
                    buf.put_zeros(pad8(name_len) - name_len);
                }
                for &val in &f.client_data {
                    buf.put_u32(val);
                }
                if f.client_data.len() % 2 == 1 {
                    buf.put_zeros(4);
                }
            }
        } else {
            buf.put_u8(2);
            buf.put_u8(self.filters.len() as u8);
            for f in &self.filters {
                buf.put_u16(f.filter_id);
                let name = (f.filter_id >= 256).then(|| name_bytes(f.name.as_deref()));
                if let Some(name) = &name {
                    buf.put_u16(name.len() as u16);
                }
                buf.put_u16(f.flags);
                buf.put_u16(f.client_data.len() as u16);
                if let Some(name) = &name {
                    buf.extend_from_slice(name);
                }
                for &val in &f.client_data {
                    buf.put_u32(val);
                }
            }
        }
        buf
    }
}
