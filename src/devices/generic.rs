//! Attributes every device has
use crate::{
    bus::search::{verify, SearchKind},
    error::Result,
    system::Query,
    types::{AttributeDescriptor, Extension, Format, Volatility},
};

fn hex(bytes: impl IntoIterator<Item = u8>) -> Vec<u8> {
    bytes
        .into_iter()
        .flat_map(|b| format!("{:02X}", b).into_bytes())
        .collect()
}

pub(crate) fn read_address(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex(q.sn.to_bytes()))
}

pub(crate) fn read_r_address(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex(q.sn.to_bytes().into_iter().rev()))
}

pub(crate) fn read_crc8(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex([q.sn.crc()]))
}

pub(crate) fn read_family(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex([q.sn.family()]))
}

pub(crate) fn read_id(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex(q.sn.id()))
}

pub(crate) fn read_r_id(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(hex(q.sn.id().into_iter().rev()))
}

pub(crate) fn read_type(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(q.device.name.as_bytes().to_vec())
}

/// Whether the device answers right now, one byte
pub(crate) fn read_present(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let (sn, branches) = (q.sn, q.branches());
    let present = verify(q.bus()?, branches, &sn, SearchKind::Normal)?;
    Ok(vec![u8::from(present)])
}

/// Text describing an attribute, as read from the `structure` area.
///
/// `format,index,elements,access,length,change,`
pub(crate) fn describe(attr: &AttributeDescriptor, ext: Extension) -> String {
    let format = match attr.format {
        Format::Integer => 'i',
        Format::Unsigned => 'u',
        Format::Float => 'f',
        Format::Date => 'd',
        Format::Bitfield | Format::YesNo => 'y',
        Format::Binary => 'b',
        Format::Ascii => 'a',
        Format::Directory | Format::Subdir => 'D',
    };
    let index = match ext {
        Extension::Index(i) => i,
        _ => 0,
    };
    let elements = attr.aggregate.map_or(1, |ag| ag.elements);
    let access = match (attr.read.is_some(), attr.write.is_some()) {
        (true, true) => "rw",
        (true, false) => "ro",
        (false, true) => "wo",
        (false, false) => "oo",
    };
    let change = match attr.change {
        Volatility::Volatile => 'v',
        Volatility::Stable => 's',
        Volatility::Second => 'S',
        Volatility::Static => 'f',
        Volatility::Statistic => 't',
        Volatility::Persistent => 'p',
        Volatility::Directory => 'd',
        Volatility::Presence => 'P',
    };
    format!(
        "{},{:06},{:06},{},{:06},{},",
        format, index, elements, access, attr.length, change
    )
}
