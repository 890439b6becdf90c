//! Minimal `.rsrc` directory walk: just enough to pull the product version
//! and `StringFileInfo` key/value pairs out of `VS_VERSION_INFO`.
//!
//! This does not attempt to be a general resource-directory reader; it
//! walks exactly the `RT_VERSION` subtree.

use goblin::pe::PE;

use crate::image::FileProperties;

const RT_VERSION: u32 = 16;

/// Parses the resource directory's `RT_VERSION` entry, if present, into a
/// `(version_tuple, version_string, file_properties)` triple.
pub fn extract_version_info(
    bytes: &[u8],
    pe: &PE,
) -> Option<(Option<(u16, u16, u16, u16)>, Option<String>, FileProperties)> {
    let opt = pe.header.optional_header?;
    let dir = opt.data_directories.get_resource_table()?;
    if dir.virtual_address == 0 || dir.size == 0 {
        return None;
    }

    let section = pe
        .sections
        .iter()
        .find(|s| rva_in_section(dir.virtual_address, s))?;
    let rsrc_file_base = section.pointer_to_raw_data as usize;
    let rsrc_rva_base = section.virtual_address;

    let rva_to_file = |rva: u32| -> Option<usize> {
        let delta = rva.checked_sub(rsrc_rva_base)?;
        Some(rsrc_file_base + delta as usize)
    };

    let root_off = rva_to_file(dir.virtual_address)?;
    let version_entry_off = find_named_or_id_entry(bytes, root_off, RT_VERSION)?;
    // RT_VERSION -> [name/id] -> [language] -> data entry, three directory
    // levels deep before reaching an IMAGE_RESOURCE_DATA_ENTRY.
    let lang_dir_off = resolve_subdirectory(bytes, root_off, version_entry_off)?;
    let first_id_off = first_entry(bytes, lang_dir_off)?;
    let data_dir_off = resolve_subdirectory(bytes, root_off, first_id_off)?;
    let data_entry_off = first_entry(bytes, data_dir_off)?;
    let data_entry = read_data_entry(bytes, root_off, data_entry_off)?;

    let data_file_off = rva_to_file(data_entry.rva)?;
    if data_file_off + data_entry.size as usize > bytes.len() {
        return None;
    }
    let version_info = &bytes[data_file_off..data_file_off + data_entry.size as usize];
    parse_vs_version_info(version_info)
}

fn rva_in_section(rva: u32, section: &goblin::pe::section_table::SectionTable) -> bool {
    rva >= section.virtual_address
        && rva < section.virtual_address + section.virtual_size.max(section.size_of_raw_data)
}

struct DataEntry {
    rva: u32,
    size: u32,
}

/// `IMAGE_RESOURCE_DIRECTORY` is 16 bytes, followed by
/// `NumberOfNamedEntries + NumberOfIdEntries` 8-byte entries.
fn entry_count(bytes: &[u8], dir_off: usize) -> Option<u32> {
    let named = u16::from_le_bytes(bytes.get(dir_off + 12..dir_off + 14)?.try_into().ok()?) as u32;
    let id = u16::from_le_bytes(bytes.get(dir_off + 14..dir_off + 16)?.try_into().ok()?) as u32;
    Some(named + id)
}

fn find_named_or_id_entry(bytes: &[u8], dir_off: usize, id: u32) -> Option<usize> {
    let count = entry_count(bytes, dir_off)?;
    for i in 0..count {
        let entry_off = dir_off + 16 + i as usize * 8;
        let name_or_id = u32::from_le_bytes(bytes.get(entry_off..entry_off + 4)?.try_into().ok()?);
        if name_or_id & 0x8000_0000 == 0 && name_or_id == id {
            return Some(entry_off);
        }
    }
    None
}

fn first_entry(bytes: &[u8], dir_off: usize) -> Option<usize> {
    let count = entry_count(bytes, dir_off)?;
    if count == 0 {
        return None;
    }
    Some(dir_off + 16)
}

/// Resolves an `IMAGE_RESOURCE_DIRECTORY_ENTRY` known to point at a
/// subdirectory, returning that subdirectory's file offset.
fn resolve_subdirectory(bytes: &[u8], root_off: usize, entry_off: usize) -> Option<usize> {
    let offset_field = u32::from_le_bytes(bytes.get(entry_off + 4..entry_off + 8)?.try_into().ok()?);
    if offset_field & 0x8000_0000 == 0 {
        return None;
    }
    Some(root_off + (offset_field & 0x7fff_ffff) as usize)
}

fn read_data_entry(bytes: &[u8], root_off: usize, entry_off: usize) -> Option<DataEntry> {
    let offset_field = u32::from_le_bytes(bytes.get(entry_off + 4..entry_off + 8)?.try_into().ok()?);
    if offset_field & 0x8000_0000 != 0 {
        return None;
    }
    let data_off = root_off + offset_field as usize;
    let rva = u32::from_le_bytes(bytes.get(data_off..data_off + 4)?.try_into().ok()?);
    let size = u32::from_le_bytes(bytes.get(data_off + 4..data_off + 8)?.try_into().ok()?);
    Some(DataEntry { rva, size })
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn read_utf16_key(bytes: &[u8], off: usize) -> Option<(String, usize)> {
    let mut units = Vec::new();
    let mut pos = off;
    loop {
        let unit = u16::from_le_bytes(bytes.get(pos..pos + 2)?.try_into().ok()?);
        pos += 2;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    let text = String::from_utf16(&units).ok()?;
    Some((text, pos))
}

/// Walks `VS_VERSIONINFO -> VS_FIXEDFILEINFO` for the numeric product
/// version, then descends into `StringFileInfo -> StringTable -> String`
/// for the key/value pairs.
fn parse_vs_version_info(
    data: &[u8],
) -> Option<(Option<(u16, u16, u16, u16)>, Option<String>, FileProperties)> {
    // VS_VERSIONINFO header: wLength, wValueLength, wType, szKey (L"VS_VERSION_INFO\0")
    let mut pos = 6;
    let (_key, after_key) = read_utf16_key(data, pos)?;
    pos = align4(after_key);

    let mut version_tuple = None;
    // VS_FIXEDFILEINFO, if wValueLength != 0.
    let value_length = u16::from_le_bytes(data.get(2..4)?.try_into().ok()?);
    if value_length >= 52 {
        let fixed = data.get(pos..pos + 52)?;
        let signature = u32::from_le_bytes(fixed[0..4].try_into().ok()?);
        if signature == 0xFEEF_04BD {
            let product_ms = u32::from_le_bytes(fixed[16..20].try_into().ok()?);
            let product_ls = u32::from_le_bytes(fixed[20..24].try_into().ok()?);
            version_tuple = Some((
                (product_ms >> 16) as u16,
                (product_ms & 0xffff) as u16,
                (product_ls >> 16) as u16,
                (product_ls & 0xffff) as u16,
            ));
        }
        pos += 52;
    }
    pos = align4(pos);

    let mut properties = FileProperties::new();
    let mut version_string = None;

    // Children of VS_VERSIONINFO: StringFileInfo and/or VarFileInfo blocks.
    while pos + 6 <= data.len() {
        let block_start = pos;
        let block_len = u16::from_le_bytes(data.get(pos..pos + 2)?.try_into().ok()?) as usize;
        if block_len == 0 {
            break;
        }
        let (block_key, after_block_key) = read_utf16_key(data, pos + 6)?;
        let children_start = align4(after_block_key);
        if block_key == "StringFileInfo" {
            walk_string_file_info(data, children_start, block_start + block_len, &mut properties);
        }
        pos = align4(block_start + block_len);
    }

    if let Some(v) = properties.get("ProductVersion") {
        version_string = Some(v.clone());
    }

    Some((version_tuple, version_string, properties))
}

fn walk_string_file_info(data: &[u8], mut pos: usize, end: usize, out: &mut FileProperties) {
    // One StringTable child per language/codepage, itself holding String entries.
    while pos + 6 <= end && pos + 6 <= data.len() {
        let table_start = pos;
        let Some(block_len) = data.get(pos..pos + 2).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
            break;
        };
        let block_len = block_len as usize;
        if block_len == 0 {
            break;
        }
        let Some((_lang_key, after_key)) = read_utf16_key(data, pos + 6) else {
            break;
        };
        let strings_start = align4(after_key);
        walk_string_table(data, strings_start, table_start + block_len, out);
        pos = align4(table_start + block_len);
    }
}

fn walk_string_table(data: &[u8], mut pos: usize, end: usize, out: &mut FileProperties) {
    while pos + 6 <= end && pos + 6 <= data.len() {
        let entry_start = pos;
        let Some(block_len) = data.get(pos..pos + 2).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
            break;
        };
        let block_len = block_len as usize;
        if block_len == 0 {
            break;
        }
        let value_length = data
            .get(pos + 2..pos + 4)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
            .unwrap_or(0) as usize;
        let Some((key, after_key)) = read_utf16_key(data, pos + 6) else {
            break;
        };
        let value_start = align4(after_key);
        if value_length > 0 {
            let value_bytes_len = value_length * 2;
            if let Some(value_bytes) = data.get(value_start..value_start + value_bytes_len) {
                let units: Vec<u16> = value_bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                if let Ok(value) = String::from_utf16(&units) {
                    out.insert(key, value);
                }
            }
        }
        pos = align4(entry_start + block_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `VS_VERSION_INFO` resource with a `(5, 3, 0, 0)` fixed-file-info
    /// version and a single `ProductVersion` string, built by hand the same
    /// way a real linker lays one out.
    #[test]
    fn parse_vs_version_info_reads_fixed_version_and_product_version_string() {
        let data: Vec<u8> = vec![
            // VS_VERSIONINFO header: wLength=204, wValueLength=52, wType=0,
            // szKey=L"VS_VERSION_INFO\0", padded to a 4-byte boundary.
            0xCC, 0x00, 0x34, 0x00, 0x00, 0x00, 0x56, 0x00, 0x53, 0x00, 0x5F, 0x00, 0x56, 0x00,
            0x45, 0x00, 0x52, 0x00, 0x53, 0x00, 0x49, 0x00, 0x4F, 0x00, 0x4E, 0x00, 0x5F, 0x00,
            0x49, 0x00, 0x4E, 0x00, 0x46, 0x00, 0x4F, 0x00, 0x00, 0x00, 0x00, 0x00,
            // VS_FIXEDFILEINFO (52 bytes): signature, then zeros up through
            // dwProductVersionMS/LS at relative offset 16/20 (5.3.0.0), then
            // zeros through the rest of the struct.
            0xBD, 0x04, 0xEF, 0xFE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x03, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // StringFileInfo block (wLength=112), key=L"StringFileInfo\0".
            0x70, 0x00, 0x00, 0x00, 0x01, 0x00, 0x53, 0x00, 0x74, 0x00, 0x72, 0x00, 0x69, 0x00,
            0x6E, 0x00, 0x67, 0x00, 0x46, 0x00, 0x69, 0x00, 0x6C, 0x00, 0x65, 0x00, 0x49, 0x00,
            0x6E, 0x00, 0x66, 0x00, 0x6F, 0x00, 0x00, 0x00,
            // StringTable block (wLength=76), key=L"040904B0\0".
            0x4C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x30, 0x00, 0x34, 0x00, 0x30, 0x00, 0x39, 0x00,
            0x30, 0x00, 0x34, 0x00, 0x42, 0x00, 0x30, 0x00, 0x00, 0x00,
            // String entry (wLength=52, wValueLength=8 units incl. null),
            // key=L"ProductVersion\0", value=L"5.3.0.0\0".
            0x34, 0x00, 0x08, 0x00, 0x01, 0x00, 0x50, 0x00, 0x72, 0x00, 0x6F, 0x00, 0x64, 0x00,
            0x75, 0x00, 0x63, 0x00, 0x74, 0x00, 0x56, 0x00, 0x65, 0x00, 0x72, 0x00, 0x73, 0x00,
            0x69, 0x00, 0x6F, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x35, 0x00, 0x2E, 0x00, 0x33, 0x00,
            0x2E, 0x00, 0x30, 0x00, 0x2E, 0x00, 0x30, 0x00, 0x00, 0x00,
        ];

        let (version_tuple, version_string, properties) = parse_vs_version_info(&data).unwrap();
        assert_eq!(version_tuple, Some((5, 3, 0, 0)));
        assert_eq!(version_string.as_deref(), Some("5.3.0.0"));
        assert_eq!(properties.get("ProductVersion").map(String::as_str), Some("5.3.0.0"));
    }

    #[test]
    fn parse_vs_version_info_rejects_truncated_buffer() {
        assert!(parse_vs_version_info(&[0u8; 4]).is_none());
    }
}
