//! PE image memory model: section lookup, RVA→bytes, version metadata,
//! and the pattern/call/pointer search primitives built on top of it.

use std::path::Path;

use goblin::pe::PE;

use crate::error::{ImageError, ImageResult};
use crate::pattern::Pattern;
use crate::stream::{Stream, StreamMode};

/// A PE section: name plus its `(virtual_address, bytes)` window.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub virtual_address: u64,
    pub bytes: Vec<u8>,
}

/// Key/value file properties pulled from the `VS_VERSION_INFO` resource's
/// `StringFileInfo` block (`CompanyName`, `ProductName`, ...).
pub type FileProperties = std::collections::BTreeMap<String, String>;

/// Immutable snapshot of a PE binary: sections, image base, and version
/// metadata. Every RVA returned by any operation lies inside exactly one
/// section.
pub struct Image {
    image_base: u64,
    sections: Vec<Section>,
    version_tuple: Option<(u16, u16, u16, u16)>,
    version_string: Option<String>,
    file_properties: FileProperties,
}

impl Image {
    /// Parses a PE image from an owned byte buffer.
    pub fn from_bytes(bytes: &[u8]) -> ImageResult<Self> {
        let pe = PE::parse(bytes)?;
        let image_base = pe.image_base as u64;

        let mut sections = Vec::with_capacity(pe.sections.len());
        for s in &pe.sections {
            let name = s.name().unwrap_or("<invalid>").to_string();
            let start = s.pointer_to_raw_data as usize;
            let raw_len = s.size_of_raw_data as usize;
            let vsize = s.virtual_size as usize;
            let len = raw_len.min(vsize.max(raw_len));
            let end = (start + raw_len).min(bytes.len());
            let mut data = if start < bytes.len() {
                bytes[start..end].to_vec()
            } else {
                Vec::new()
            };
            // Sections loaded into memory are zero-padded out to their
            // virtual size when larger than the bytes on disk.
            if vsize > data.len() {
                data.resize(vsize, 0);
            }
            let _ = len;
            sections.push(Section {
                name,
                virtual_address: image_base + s.virtual_address as u64,
                bytes: data,
            });
        }

        let (version_tuple, version_string, file_properties) =
            crate::resources::extract_version_info(bytes, &pe).unwrap_or_default();

        Ok(Image {
            image_base,
            sections,
            version_tuple,
            version_string,
            file_properties,
        })
    }

    /// Reads and parses a PE file from disk, memory-mapping it.
    pub fn open(path: impl AsRef<Path>) -> ImageResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ImageError::Open(path.to_path_buf(), e))?;
        // Safety: the mapped file is only read for the lifetime of this
        // call; we copy everything we need (sections, version info) into
        // owned buffers before returning, so no borrow of the mapping
        // escapes `from_bytes`.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| ImageError::Open(path.to_path_buf(), e))?;
        Self::from_bytes(&mmap)
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    pub fn version_tuple(&self) -> Option<(u16, u16, u16, u16)> {
        self.version_tuple
    }

    /// The version tuple with trailing zero components trimmed.
    pub fn version_tuple_trimmed(&self) -> Option<Vec<u16>> {
        self.version_tuple.map(|(a, b, c, d)| {
            let mut v = vec![a, b, c, d];
            while v.len() > 1 && *v.last().unwrap() == 0 {
                v.pop();
            }
            v
        })
    }

    pub fn version_string(&self) -> Option<&str> {
        self.version_string.as_deref()
    }

    pub fn file_properties(&self) -> &FileProperties {
        &self.file_properties
    }

    /// Locates the section containing `rva`, or `None` if `rva` is below
    /// the image base.
    pub fn section_of(&self, rva: u64) -> ImageResult<Option<&Section>> {
        if rva < self.image_base {
            return Ok(None);
        }
        for s in &self.sections {
            if rva >= s.virtual_address && rva < s.virtual_address + s.bytes.len() as u64 {
                return Ok(Some(s));
            }
        }
        Err(ImageError::RvaOutOfBounds(rva))
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> ImageResult<&Section> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ImageError::SectionNotFound(name.to_string()))
    }

    /// Returns `(base_rva, bytes)` for the named section.
    pub fn bytes_of_section(&self, name: &str) -> ImageResult<(u64, &[u8])> {
        let s = self.section(name)?;
        Ok((s.virtual_address, &s.bytes))
    }

    /// A stream positioned at `rva`, viewing the section that contains it.
    pub fn stream_at(&self, rva: u64, mode: StreamMode) -> ImageResult<Stream<'_>> {
        let section = self
            .section_of(rva)?
            .ok_or(ImageError::RvaOutOfBounds(rva))?;
        let offset = (rva - section.virtual_address) as usize;
        Ok(Stream::new(&section.bytes, section.virtual_address, offset, mode))
    }

    /// Finds every RVA in `section_name` matching `pattern`.
    pub fn find_pattern<'a>(
        &'a self,
        pattern: &'a Pattern,
        section_name: &str,
    ) -> ImageResult<impl Iterator<Item = u64> + 'a> {
        let (base, bytes) = self.bytes_of_section(section_name)?;
        Ok(pattern.search(bytes).map(move |off| base + off as u64))
    }

    /// Finds every `CALL rel32` (`0xE8 <rel32>`) site in `section_name`
    /// whose decoded target equals `target_rva`.
    pub fn find_calls<'a>(
        &'a self,
        target_rva: u64,
        section_name: &str,
    ) -> ImageResult<impl Iterator<Item = u64> + 'a> {
        let (base, bytes) = self.bytes_of_section(section_name)?;
        Ok(find_calls_in(bytes, base, target_rva))
    }

    /// Finds every 8-byte-aligned 64-bit word in `section_name` equal to
    /// `target_rva`.
    pub fn find_aligned_pointers<'a>(
        &'a self,
        target_rva: u64,
        section_name: &str,
    ) -> ImageResult<impl Iterator<Item = u64> + 'a> {
        let (base, bytes) = self.bytes_of_section(section_name)?;
        let usable = bytes.len() - (bytes.len() % 8);
        Ok((0..usable)
            .step_by(8)
            .filter(move |&off| {
                u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) == target_rva
            })
            .map(move |off| base + off as u64))
    }

    /// Returns up to `max_len` bytes starting at `rva`, clipped to the end
    /// of the containing section. Used to seed a decoder window.
    pub fn code_window(&self, rva: u64, max_len: usize) -> ImageResult<&[u8]> {
        let section = self.section_of(rva)?.ok_or(ImageError::RvaOutOfBounds(rva))?;
        let offset = (rva - section.virtual_address) as usize;
        let end = (offset + max_len).min(section.bytes.len());
        Ok(&section.bytes[offset..end])
    }

    /// Records every `CALL rel32` site in `.text`, grouped by target RVA.
    /// This is a diagnostic pre-pass carried over from the original
    /// implementation; it has no effect on the discovery worklist.
    pub fn all_calls(&self) -> ImageResult<std::collections::HashMap<u64, Vec<u64>>> {
        let (base, bytes) = self.bytes_of_section(".text")?;
        let mut map: std::collections::HashMap<u64, Vec<u64>> = std::collections::HashMap::new();
        for (target, offset) in find_all_calls(bytes, base) {
            map.entry(target).or_default().push(offset);
        }
        Ok(map)
    }
}

fn find_calls_in(memory: &[u8], base: u64, target: u64) -> impl Iterator<Item = u64> + '_ {
    (0..memory.len().saturating_sub(5)).filter_map(move |offset| {
        if memory[offset] != 0xE8 {
            return None;
        }
        let delta = i32::from_le_bytes(memory[offset + 1..offset + 5].try_into().unwrap());
        let call_target = (base + offset as u64 + 5).wrapping_add(delta as i64 as u64);
        (call_target == target).then_some(base + offset as u64)
    })
}

fn find_all_calls(memory: &[u8], base: u64) -> impl Iterator<Item = (u64, u64)> + '_ {
    (0..memory.len().saturating_sub(5)).filter_map(move |offset| {
        if memory[offset] != 0xE8 {
            return None;
        }
        let delta = i32::from_le_bytes(memory[offset + 1..offset + 5].try_into().unwrap());
        let call_target = (base + offset as u64 + 5).wrapping_add(delta as i64 as u64);
        Some((call_target, base + offset as u64))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Hand-assembled synthetic PE images for unit and integration tests.
    use super::*;

    /// Builds a minimal well-formed PE64 image with a `.text` and `.rdata`
    /// section of the given sizes, returning the raw bytes.
    pub fn build_minimal_pe(text: &[u8], rdata: &[u8]) -> Vec<u8> {
        const FILE_ALIGN: usize = 0x200;
        const SECTION_ALIGN: usize = 0x1000;
        const IMAGE_BASE: u64 = 0x1_4000_0000;

        fn pad(buf: &mut Vec<u8>, align: usize) {
            let rem = buf.len() % align;
            if rem != 0 {
                buf.resize(buf.len() + (align - rem), 0);
            }
        }

        let mut text_raw = text.to_vec();
        pad(&mut text_raw, FILE_ALIGN);
        let mut rdata_raw = rdata.to_vec();
        pad(&mut rdata_raw, FILE_ALIGN);

        let num_sections = 2u16;
        let section_header_size = 40usize;
        let dos_header_size = 0x40;
        let nt_headers_offset = dos_header_size;
        let coff_size = 24;
        let opt_header_size = 240; // PE32+ optional header (generous)
        let headers_size = nt_headers_offset + 4 + coff_size + opt_header_size + num_sections as usize * section_header_size;
        let headers_size_aligned = {
            let rem = headers_size % FILE_ALIGN;
            if rem == 0 { headers_size } else { headers_size + (FILE_ALIGN - rem) }
        };

        let text_file_off = headers_size_aligned;
        let text_rva = SECTION_ALIGN as u32;
        let rdata_file_off = text_file_off + text_raw.len();
        let rdata_rva = text_rva + round_up(text_raw.len().max(1), SECTION_ALIGN) as u32;

        let mut buf = vec![0u8; headers_size_aligned];

        // DOS header
        buf[0..2].copy_from_slice(b"MZ");
        buf[0x3c..0x40].copy_from_slice(&(nt_headers_offset as u32).to_le_bytes());

        let mut off = nt_headers_offset;
        buf[off..off + 4].copy_from_slice(b"PE\0\0");
        off += 4;
        // COFF header
        buf[off..off + 2].copy_from_slice(&0x8664u16.to_le_bytes()); // machine: x86-64
        buf[off + 2..off + 4].copy_from_slice(&num_sections.to_le_bytes());
        buf[off + 4..off + 8].copy_from_slice(&0u32.to_le_bytes()); // timestamp
        buf[off + 8..off + 12].copy_from_slice(&0u32.to_le_bytes()); // symtab ptr
        buf[off + 12..off + 16].copy_from_slice(&0u32.to_le_bytes()); // num symbols
        buf[off + 16..off + 18].copy_from_slice(&(opt_header_size as u16).to_le_bytes());
        buf[off + 18..off + 20].copy_from_slice(&0x0022u16.to_le_bytes()); // characteristics: executable, large-address-aware
        off += coff_size;

        // Optional header (PE32+)
        let opt_start = off;
        buf[off..off + 2].copy_from_slice(&0x20bu16.to_le_bytes()); // magic PE32+
        off += 2;
        buf[off] = 14; // major linker ver
        off += 1;
        buf[off] = 0;
        off += 1;
        buf[off..off + 4].copy_from_slice(&(round_up(text_raw.len().max(1), FILE_ALIGN) as u32).to_le_bytes()); // size of code
        off += 4;
        off += 4; // size of init data
        off += 4; // size of uninit data
        buf[off..off + 4].copy_from_slice(&text_rva.to_le_bytes()); // entry point
        off += 4;
        buf[off..off + 4].copy_from_slice(&text_rva.to_le_bytes()); // base of code
        off += 4;
        buf[off..off + 8].copy_from_slice(&IMAGE_BASE.to_le_bytes()); // image base (u64 for PE32+)
        off += 8;
        buf[off..off + 4].copy_from_slice(&(SECTION_ALIGN as u32).to_le_bytes()); // section align
        off += 4;
        buf[off..off + 4].copy_from_slice(&(FILE_ALIGN as u32).to_le_bytes()); // file align
        off += 4;
        off += 2 + 2 + 2 + 2 + 2 + 2; // os/image/subsys version fields
        off += 4; // win32 version value
        let size_of_image = round_up(rdata_rva as usize + round_up(rdata_raw.len().max(1), SECTION_ALIGN), SECTION_ALIGN);
        buf[off..off + 4].copy_from_slice(&(size_of_image as u32).to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&(headers_size_aligned as u32).to_le_bytes()); // size of headers
        off += 4;
        off += 4; // checksum
        buf[off..off + 2].copy_from_slice(&3u16.to_le_bytes()); // subsystem: console
        off += 2;
        off += 2; // dll characteristics
        off += 8 * 4; // stack/heap reserve/commit (u64 each for PE32+)
        off += 4; // loader flags
        let num_rva_and_sizes = 16u32;
        buf[off..off + 4].copy_from_slice(&num_rva_and_sizes.to_le_bytes());
        off += 4;
        // data directories (16 * 8 bytes), zeroed
        off += num_rva_and_sizes as usize * 8;
        let _ = opt_start;
        debug_assert!(off <= opt_start + opt_header_size + 64);

        // Section headers
        let mut sh_off = nt_headers_offset + 4 + coff_size + opt_header_size;
        let write_section = |buf: &mut Vec<u8>, sh_off: usize, name: &[u8; 8], rva: u32, vsize: u32, raw_off: u32, raw_size: u32, chars: u32| {
            buf[sh_off..sh_off + 8].copy_from_slice(name);
            buf[sh_off + 8..sh_off + 12].copy_from_slice(&vsize.to_le_bytes());
            buf[sh_off + 12..sh_off + 16].copy_from_slice(&rva.to_le_bytes());
            buf[sh_off + 16..sh_off + 20].copy_from_slice(&raw_size.to_le_bytes());
            buf[sh_off + 20..sh_off + 24].copy_from_slice(&raw_off.to_le_bytes());
            buf[sh_off + 36..sh_off + 40].copy_from_slice(&chars.to_le_bytes());
        };
        let mut text_name = [0u8; 8];
        text_name[..5].copy_from_slice(b".text");
        write_section(&mut buf, sh_off, &text_name, text_rva, text_raw.len() as u32, text_file_off as u32, text_raw.len() as u32, 0x6000_0020);
        sh_off += section_header_size;
        let mut rdata_name = [0u8; 8];
        rdata_name[..6].copy_from_slice(b".rdata");
        write_section(&mut buf, sh_off, &rdata_name, rdata_rva, rdata_raw.len() as u32, rdata_file_off as u32, rdata_raw.len() as u32, 0x4000_0040);

        buf.extend_from_slice(&text_raw);
        buf.extend_from_slice(&rdata_raw);
        buf
    }

    fn round_up(v: usize, align: usize) -> usize {
        (v + align - 1) / align * align
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::build_minimal_pe;
    use super::*;

    #[test]
    fn parses_sections_and_base() {
        let bytes = build_minimal_pe(&[0x90; 16], &[0xAAu8; 16]);
        let image = Image::from_bytes(&bytes).expect("parse");
        assert_eq!(image.image_base(), 0x1_4000_0000);
        let (base, text) = image.bytes_of_section(".text").unwrap();
        assert_eq!(base, 0x1_4000_1000);
        assert_eq!(&text[..16], &[0x90; 16]);
        let (rbase, rdata) = image.bytes_of_section(".rdata").unwrap();
        assert!(rbase > base);
        assert_eq!(&rdata[..16], &[0xAA; 16]);
    }

    #[test]
    fn section_of_classifies_rva() {
        let bytes = build_minimal_pe(&[0x90; 16], &[0u8; 16]);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".text").unwrap();
        assert!(image.section_of(base).unwrap().is_some());
        assert!(image.section_of(0).unwrap().is_none());
    }

    #[test]
    fn find_calls_detects_e8_rel32() {
        let target: u32 = 0; // relative to code start, filled below
        let mut text = vec![0x90u8; 4];
        // CALL rel32 at offset 4, targeting offset 0 relative encoding done below
        text.extend_from_slice(&[0xE8, 0, 0, 0, 0]);
        let bytes = build_minimal_pe(&text, &[]);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".text").unwrap();
        // Patch the call's rel32 so it targets `base` exactly.
        let mut bytes = bytes;
        let text_file_off = bytes
            .windows(text.len().min(16))
            .position(|w| w == &text[..w.len()])
            .unwrap();
        let call_off = text_file_off + 4 + 1;
        let rel: i32 = (base as i64 - (base as i64 + 4 + 5)) as i32;
        bytes[call_off..call_off + 4].copy_from_slice(&rel.to_le_bytes());
        let image = Image::from_bytes(&bytes).unwrap();
        let hits: Vec<u64> = image.find_calls(base, ".text").unwrap().collect();
        assert_eq!(hits, vec![base + 4]);
        let _ = target;
    }

    #[test]
    fn find_aligned_pointers_finds_matching_qwords() {
        let mut rdata = vec![0u8; 24];
        rdata[8..16].copy_from_slice(&0xdead_beef_u64.to_le_bytes());
        let bytes = build_minimal_pe(&[], &rdata);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".rdata").unwrap();
        let hits: Vec<u64> = image.find_aligned_pointers(0xdead_beef, ".rdata").unwrap().collect();
        assert_eq!(hits, vec![base + 8]);
    }
}
