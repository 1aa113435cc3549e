//! An xlsx archive held as its raw parts.
//!
//! Opening reads every zip entry without interpreting any worksheet. An upsert drops the parts of
//! the sheet it replaces, adds one generated worksheet and regenerates the content-type list, the
//! workbook relationships and the `<sheets>` list of the workbook part. Every other part
//! (retained worksheets, styles, shared strings, drawings, document properties) is written back
//! byte-for-byte, and the rest of the workbook part is copied event by event.

use super::xlsx::{self, attr, NS_MAIN, XML_DECL};
use super::{Sheet, Workbook};
use anyhow::{ensure, Context, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const NS_PKG_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_DOC_RELS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const ROOT_RELS_PART: &str = "_rels/.rels";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const DEFAULT_STYLES_PART: &str = "xl/styles.xml";

const CT_RELS: &str = "application/vnd.openxmlformats-package.relationships+xml";
const CT_XML: &str = "application/xml";
const CT_WORKBOOK: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
const CT_WORKSHEET: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

/// Attributes that hold a zero-based sheet position.
const DEFINED_NAME_SHEET: &[&[u8]] = &[b"localSheetId"];
const VIEW_SHEETS: &[&[u8]] = &[b"activeTab", b"firstSheet"];

const STYLES_XML: &str = concat!(
    r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>"#,
    r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
    r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
    r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>"#,
    r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
);

#[derive(Debug, Clone)]
struct Part {
    name: String,
    data: Vec<u8>,
}

impl Part {
    fn new(name: &str, data: String) -> Self {
        Self {
            name: name.to_string(),
            data: data.into_bytes(),
        }
    }

    fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.data).with_context(|| format!("part is not UTF-8: {}", self.name))
    }
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
    mode: Option<String>,
}

impl Relationship {
    /// Matches on the last segment of the type URI, which is the same in transitional and strict
    /// namespaces.
    fn is(&self, kind: &str) -> bool {
        self.kind.rsplit('/').next() == Some(kind)
    }
}

#[derive(Debug, Clone, Default)]
struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    sheet_id: u32,
    rel_id: String,
    /// Position in the workbook as it was opened; `None` for sheets added since.
    source_index: Option<usize>,
    /// Attributes as read (`state="hidden"` and the like). Empty for added sheets.
    attrs: Vec<(String, String)>,
}

impl SheetEntry {
    fn element(&self, qname: &str, rel_prefix: Option<&str>) -> BytesStart<'static> {
        let mut e = BytesStart::new(qname.to_string());
        if !self.attrs.is_empty() {
            for (k, v) in &self.attrs {
                e.push_attribute((k.as_str(), v.as_str()));
            }
            return e;
        }

        let sheet_id = self.sheet_id.to_string();
        e.push_attribute(("name", self.name.as_str()));
        e.push_attribute(("sheetId", sheet_id.as_str()));
        match rel_prefix {
            Some(p) => e.push_attribute((format!("{p}:id").as_str(), self.rel_id.as_str())),
            None => {
                e.push_attribute(("xmlns:r", NS_DOC_RELS));
                e.push_attribute(("r:id", self.rel_id.as_str()));
            }
        }
        e
    }
}

/// A workbook archive that can take one sheet at a time without disturbing the others.
#[derive(Debug, Clone)]
pub struct Package {
    /// Everything except the content types, the workbook part and its relationships.
    parts: Vec<Part>,
    content_types: ContentTypes,
    workbook_part: String,
    workbook_xml: String,
    rels: Vec<Relationship>,
    sheets: Vec<SheetEntry>,
    /// Prefix bound to the office relationships namespace on the workbook root.
    rel_prefix: Option<String>,
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

impl Package {
    /// An empty workbook with a minimal stylesheet.
    pub fn new() -> Self {
        let workbook_xml = format!(
            r#"{XML_DECL}<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_DOC_RELS}"><sheets/></workbook>"#
        );
        let root_rels = format!(
            r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}"><Relationship Id="rId1" Type="{NS_DOC_RELS}/officeDocument" Target="{DEFAULT_WORKBOOK_PART}"/></Relationships>"#
        );
        let styles = format!(r#"{XML_DECL}<styleSheet xmlns="{NS_MAIN}">{STYLES_XML}</styleSheet>"#);

        Self {
            parts: vec![
                Part::new(ROOT_RELS_PART, root_rels),
                Part::new(DEFAULT_STYLES_PART, styles),
            ],
            content_types: ContentTypes {
                defaults: vec![
                    ("rels".to_string(), CT_RELS.to_string()),
                    ("xml".to_string(), CT_XML.to_string()),
                ],
                overrides: vec![
                    (format!("/{DEFAULT_WORKBOOK_PART}"), CT_WORKBOOK.to_string()),
                    (format!("/{DEFAULT_STYLES_PART}"), CT_STYLES.to_string()),
                ],
            },
            workbook_part: DEFAULT_WORKBOOK_PART.to_string(),
            workbook_xml,
            rels: vec![Relationship {
                id: "rId1".to_string(),
                kind: format!("{NS_DOC_RELS}/styles"),
                target: "styles.xml".to_string(),
                mode: None,
            }],
            sheets: Vec::new(),
            rel_prefix: Some("r".to_string()),
        }
    }

    pub fn from_workbook(workbook: &Workbook) -> Result<Self> {
        let mut package = Self::new();
        for sheet in workbook.sheets() {
            package.upsert_sheet(sheet)?;
        }
        Ok(package)
    }

    /// Opens the archive at `path`, or starts an empty one when the file does not exist.
    pub fn open_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open workbook failed: {}", path.display()))?;
        Self::read_from(file).with_context(|| format!("read workbook failed: {}", path.display()))
    }

    pub fn read_from<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader).context("open zip archive failed")?;
        let mut parts = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .with_context(|| format!("open zip entry failed: #{i}"))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry failed: {name}"))?;
            parts.push(Part { name, data });
        }

        let content_types = take_part(&mut parts, CONTENT_TYPES_PART)
            .with_context(|| format!("{CONTENT_TYPES_PART} missing from archive"))?;
        let content_types = parse_content_types(content_types.text()?)?;

        let office_document = match find_part(&parts, ROOT_RELS_PART) {
            Some(p) => parse_relationships(p.text()?)?
                .into_iter()
                .find(|r| r.is("officeDocument"))
                .map(|r| resolve_target("", &r.target)),
            None => None,
        };
        let workbook_part = office_document.unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string());

        let workbook_xml = take_part(&mut parts, &workbook_part)
            .with_context(|| format!("{workbook_part} missing from archive"))?
            .text()?
            .to_string();
        let rels = match take_part(&mut parts, &rels_part_for(&workbook_part)) {
            Some(p) => parse_relationships(p.text()?)?,
            None => Vec::new(),
        };
        let (sheets, rel_prefix) = parse_sheet_entries(&workbook_xml)?;

        Ok(Self {
            parts,
            content_types,
            workbook_part,
            workbook_xml,
            rels,
            sheets,
            rel_prefix,
        })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Decodes the cell values of every worksheet. Chart sheets carry no cells and are skipped.
    pub fn to_workbook(&self) -> Result<Workbook> {
        let shared = match self.rels.iter().find(|r| r.is("sharedStrings")) {
            Some(rel) => {
                let name = self.resolve(&rel.target);
                let part = self
                    .part(&name)
                    .with_context(|| format!("shared strings part missing: {name}"))?;
                xlsx::parse_shared_strings(part.text()?)
                    .with_context(|| format!("parse shared strings failed: {name}"))?
            }
            None => Vec::new(),
        };

        let mut workbook = Workbook::new();
        for entry in &self.sheets {
            let rel = self.rel(&entry.rel_id).with_context(|| {
                format!("no relationship {} for sheet {}", entry.rel_id, entry.name)
            })?;
            if !rel.is("worksheet") {
                continue;
            }
            let name = self.resolve(&rel.target);
            let part = self
                .part(&name)
                .with_context(|| format!("worksheet part missing: {name}"))?;
            let rows = xlsx::parse_worksheet(part.text()?, &shared)
                .with_context(|| format!("parse worksheet failed: {}", entry.name))?;
            workbook.push_sheet(Sheet::new(entry.name.clone(), rows)?)?;
        }
        Ok(workbook)
    }

    /// Drops any sheet with the same name, then appends `sheet` as the last sheet.
    /// Returns whether an existing sheet was replaced.
    pub fn upsert_sheet(&mut self, sheet: &Sheet) -> Result<bool> {
        let replaced = match self.sheets.iter().position(|s| s.name == sheet.name()) {
            Some(idx) => {
                self.remove_sheet_at(idx);
                true
            }
            None => false,
        };

        let (target, part) = self.next_worksheet_part();
        let rel_id = self.next_rel_id();
        let sheet_id = self
            .sheets
            .iter()
            .map(|s| s.sheet_id)
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .context("sheet ids exhausted")?;

        self.parts.push(Part::new(&part, xlsx::worksheet_xml(sheet)));
        self.content_types
            .overrides
            .push((format!("/{part}"), CT_WORKSHEET.to_string()));
        self.rels.push(Relationship {
            id: rel_id.clone(),
            kind: format!("{NS_DOC_RELS}/worksheet"),
            target,
            mode: None,
        });
        self.sheets.push(SheetEntry {
            name: sheet.name().to_string(),
            sheet_id,
            rel_id,
            source_index: None,
            attrs: Vec::new(),
        });
        Ok(replaced)
    }

    fn remove_sheet_at(&mut self, idx: usize) {
        let entry = self.sheets.remove(idx);
        if let Some(pos) = self.rels.iter().position(|r| r.id == entry.rel_id) {
            let rel = self.rels.remove(pos);
            let name = self.resolve(&rel.target);
            self.drop_part(&name);
        }

        // The calculation chain may list cells of the removed sheet; Excel rebuilds it when absent.
        while let Some(pos) = self.rels.iter().position(|r| r.is("calcChain")) {
            let rel = self.rels.remove(pos);
            let name = self.resolve(&rel.target);
            self.drop_part(&name);
        }
    }

    fn drop_part(&mut self, name: &str) {
        let own_rels = rels_part_for(name);
        self.parts.retain(|p| p.name != name && p.name != own_rels);
        let part_name = format!("/{name}");
        self.content_types.overrides.retain(|(n, _)| *n != part_name);
    }

    /// `(target relative to the workbook part, part name)` of the first unused worksheet slot.
    fn next_worksheet_part(&self) -> (String, String) {
        let dir = self.workbook_part.rsplit_once('/').map_or("", |(d, _)| d);
        let mut n = 1usize;
        loop {
            let target = format!("worksheets/sheet{n}.xml");
            let part = if dir.is_empty() {
                target.clone()
            } else {
                format!("{dir}/{target}")
            };
            if self.part(&part).is_none() {
                return (target, part);
            }
            n += 1;
        }
    }

    fn next_rel_id(&self) -> String {
        let mut n = 1usize;
        loop {
            let id = format!("rId{n}");
            if self.rel(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    fn part(&self, name: &str) -> Option<&Part> {
        find_part(&self.parts, name)
    }

    fn rel(&self, id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|r| r.id == id)
    }

    fn resolve(&self, target: &str) -> String {
        resolve_target(&self.workbook_part, target)
    }

    /// Writes the archive to a sibling temp file, then renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = temp_path_for(path);

        let result = (|| -> Result<()> {
            let file = File::create(&tmp)
                .with_context(|| format!("create workbook temp file failed: {}", tmp.display()))?;
            let file = self.write_to(file)?;
            file.sync_all().context("flush workbook failed")?;
            fs::rename(&tmp, path)
                .with_context(|| format!("replace workbook failed: {}", path.display()))?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W> {
        ensure!(!self.sheets.is_empty(), "workbook must contain at least one sheet");

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(writer);

        let put = |zip: &mut ZipWriter<W>, name: &str, body: &[u8]| -> Result<()> {
            zip.start_file(name, options.clone())
                .with_context(|| format!("start zip entry failed: {name}"))?;
            zip.write_all(body)
                .with_context(|| format!("write zip entry failed: {name}"))?;
            Ok(())
        };

        put(
            &mut zip,
            CONTENT_TYPES_PART,
            content_types_xml(&self.content_types).as_bytes(),
        )?;
        for part in &self.parts {
            put(&mut zip, &part.name, &part.data)?;
        }
        let workbook_xml = rewrite_workbook_xml(&self.workbook_xml, &self.sheets, self.rel_prefix.as_deref())
            .with_context(|| format!("rewrite {} failed", self.workbook_part))?;
        put(&mut zip, &self.workbook_part, &workbook_xml)?;
        put(
            &mut zip,
            &rels_part_for(&self.workbook_part),
            relationships_xml(&self.rels).as_bytes(),
        )?;

        zip.finish().context("finish zip archive failed")
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn find_part<'a>(parts: &'a [Part], name: &str) -> Option<&'a Part> {
    parts.iter().find(|p| p.name == name)
}

fn take_part(parts: &mut Vec<Part>, name: &str) -> Option<Part> {
    let idx = parts.iter().position(|p| p.name == name)?;
    Some(parts.remove(idx))
}

/// Resolves a relationship target against the folder of its source part. Targets starting with
/// `/` are package-absolute.
fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`.
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id")?.context("relationship without Id")?;
                out.push(Relationship {
                    kind: attr(&e, b"Type")?.unwrap_or_default(),
                    target: attr(&e, b"Target")?
                        .with_context(|| format!("relationship {id} without Target"))?,
                    mode: attr(&e, b"TargetMode")?,
                    id,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn relationships_xml(rels: &[Relationship]) -> String {
    let mut out = format!(r#"{XML_DECL}<Relationships xmlns="{NS_PKG_RELS}">"#);
    for rel in rels {
        out.push_str(&format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}""#,
            escape(&rel.id),
            escape(&rel.kind),
            escape(&rel.target)
        ));
        if let Some(mode) = &rel.mode {
            out.push_str(&format!(r#" TargetMode="{}""#, escape(mode)));
        }
        out.push_str("/>");
    }
    out.push_str("</Relationships>");
    out
}

fn parse_content_types(xml: &str) -> Result<ContentTypes> {
    let mut reader = Reader::from_str(xml);
    let mut out = ContentTypes::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"Default" => {
                    if let (Some(ext), Some(ct)) = (attr(&e, b"Extension")?, attr(&e, b"ContentType")?) {
                        out.defaults.push((ext, ct));
                    }
                }
                b"Override" => {
                    if let (Some(part), Some(ct)) = (attr(&e, b"PartName")?, attr(&e, b"ContentType")?) {
                        out.overrides.push((part, ct));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn content_types_xml(types: &ContentTypes) -> String {
    let mut out = format!(r#"{XML_DECL}<Types xmlns="{NS_CONTENT_TYPES}">"#);
    for (ext, ct) in &types.defaults {
        out.push_str(&format!(
            r#"<Default Extension="{}" ContentType="{}"/>"#,
            escape(ext),
            escape(ct)
        ));
    }
    for (part, ct) in &types.overrides {
        out.push_str(&format!(
            r#"<Override PartName="{}" ContentType="{}"/>"#,
            escape(part),
            escape(ct)
        ));
    }
    out.push_str("</Types>");
    out
}

/// Sheet entries in workbook order, plus the prefix bound to the relationships namespace.
fn parse_sheet_entries(xml: &str) -> Result<(Vec<SheetEntry>, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    let mut rel_prefix = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbook" => {
                    for a in e.attributes() {
                        let a = a?;
                        if let Some(prefix) = a.key.as_ref().strip_prefix(b"xmlns:".as_slice()) {
                            if a.unescape_value()? == NS_DOC_RELS {
                                rel_prefix = Some(String::from_utf8_lossy(prefix).into_owned());
                            }
                        }
                    }
                }
                b"sheet" => {
                    let mut name = None;
                    let mut sheet_id = None;
                    let mut rel_id = None;
                    let mut attrs = Vec::new();
                    for a in e.attributes() {
                        let a = a?;
                        let value = a.unescape_value()?.into_owned();
                        match a.key.local_name().as_ref() {
                            b"name" => name = Some(value.clone()),
                            b"sheetId" => sheet_id = Some(value.clone()),
                            b"id" => rel_id = Some(value.clone()),
                            _ => {}
                        }
                        attrs.push((String::from_utf8_lossy(a.key.as_ref()).into_owned(), value));
                    }

                    let name = name.context("sheet without name")?;
                    let sheet_id = sheet_id
                        .with_context(|| format!("sheet {name} without sheetId"))?
                        .parse()
                        .with_context(|| format!("sheet {name} has a bad sheetId"))?;
                    let rel_id = rel_id.with_context(|| format!("sheet {name} without r:id"))?;
                    sheets.push(SheetEntry {
                        source_index: Some(sheets.len()),
                        name,
                        sheet_id,
                        rel_id,
                        attrs,
                    });
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok((sheets, rel_prefix))
}

/// Copies the workbook part with a new `<sheets>` list. Sheet-scoped defined names follow their
/// sheet to its new position and are dropped with it; the active and first visible tab fall back
/// to the first sheet when theirs is gone.
fn rewrite_workbook_xml(xml: &str, sheets: &[SheetEntry], rel_prefix: Option<&str>) -> Result<Vec<u8>> {
    let moved: HashMap<usize, usize> = sheets
        .iter()
        .enumerate()
        .filter_map(|(new, s)| s.source_index.map(|old| (old, new)))
        .collect();

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event()?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) if e.local_name().as_ref() == b"sheets" => {
                write_sheets(&mut writer, &e, sheets, rel_prefix)?;
                skip_depth = 1;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheets" => {
                write_sheets(&mut writer, &e, sheets, rel_prefix)?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                match remap_sheet_index(&e, DEFINED_NAME_SHEET, &moved, None)? {
                    Some(e) => writer.write_event(Event::Start(e))?,
                    None => skip_depth = 1,
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedName" => {
                if let Some(e) = remap_sheet_index(&e, DEFINED_NAME_SHEET, &moved, None)? {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"workbookView" => {
                if let Some(e) = remap_sheet_index(&e, VIEW_SHEETS, &moved, Some(0))? {
                    writer.write_event(Event::Start(e))?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"workbookView" => {
                if let Some(e) = remap_sheet_index(&e, VIEW_SHEETS, &moved, Some(0))? {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}

fn write_sheets(
    writer: &mut Writer<Vec<u8>>,
    sheets_element: &BytesStart<'_>,
    sheets: &[SheetEntry],
    rel_prefix: Option<&str>,
) -> Result<()> {
    let qname = String::from_utf8_lossy(sheets_element.name().as_ref()).into_owned();
    let sheet_qname = match qname.rsplit_once(':') {
        Some((prefix, _)) => format!("{prefix}:sheet"),
        None => "sheet".to_string(),
    };

    writer.write_event(Event::Start(BytesStart::new(qname.clone())))?;
    for entry in sheets {
        writer.write_event(Event::Empty(entry.element(&sheet_qname, rel_prefix)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(qname)))?;
    Ok(())
}

/// Copies `e` with each sheet-position attribute in `keys` moved to where that sheet now sits.
/// `None` when a sheet it names is gone and there is no `fallback`.
fn remap_sheet_index(
    e: &BytesStart<'_>,
    keys: &[&[u8]],
    moved: &HashMap<usize, usize>,
    fallback: Option<usize>,
) -> Result<Option<BytesStart<'static>>> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes() {
        let a = a?;
        let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
        let mut value = a.unescape_value()?.into_owned();
        if keys.contains(&a.key.local_name().as_ref()) {
            let old: usize = value
                .parse()
                .with_context(|| format!("bad sheet index {key}={value}"))?;
            match moved.get(&old).copied().or(fallback) {
                Some(new) => value = new.to_string(),
                None => return Ok(None),
            }
        }
        out.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(Some(out))
}
