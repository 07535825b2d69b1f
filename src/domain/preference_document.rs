//! Preference document generation and inspection
//!
//! New entries are serialized as text and spliced in front of the envelope's
//! closing tag so that entries written by other tools survive byte for byte.
//! Existing documents are only parsed to list what they already contain.

use once_cell::sync::Lazy;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::gpo::GpoScope;
use super::preference::{
    default_task_name, windows_file_name, EntryStamp, EntrySummary, FileParams,
    PreferenceKind, PreferenceParams, ServiceParams, TaskParams,
};
use crate::error::{AppError, AppResult};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;
const UNKNOWN: &str = "<unknown>";

fn close_tag_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"<\s*/\s*{}\s*>", tag)).expect("close tag pattern is valid")
}

static SCHEDULED_TASKS_CLOSE: Lazy<Regex> = Lazy::new(|| close_tag_regex("ScheduledTasks"));
static FILES_CLOSE: Lazy<Regex> = Lazy::new(|| close_tag_regex("Files"));
static SERVICES_CLOSE: Lazy<Regex> = Lazy::new(|| close_tag_regex("NTServices"));

fn close_tag_pattern(kind: PreferenceKind) -> &'static Regex {
    match kind {
        PreferenceKind::ScheduledTask => &SCHEDULED_TASKS_CLOSE,
        PreferenceKind::File => &FILES_CLOSE,
        PreferenceKind::Service => &SERVICES_CLOSE,
    }
}

/// One new entry ready to be written into a document
#[derive(Debug, Clone)]
pub struct PreferenceEntry {
    pub params: PreferenceParams,
    pub stamp: EntryStamp,
    pub scope: GpoScope,
}

impl PreferenceEntry {
    pub fn new(params: PreferenceParams, stamp: EntryStamp, scope: GpoScope) -> Self {
        // Resolve the default name once so the entry and any report agree on it.
        let params = match params {
            PreferenceParams::ScheduledTask(mut task) => {
                if task.name.as_deref().map_or(true, str::is_empty) {
                    task.name = Some(default_task_name());
                }
                PreferenceParams::ScheduledTask(task)
            }
            other => other,
        };

        Self {
            params,
            stamp,
            scope,
        }
    }

    pub fn kind(&self) -> PreferenceKind {
        self.params.kind()
    }

    /// Display label used in logs and reports
    pub fn label(&self) -> String {
        match &self.params {
            PreferenceParams::ScheduledTask(task) => task.name.clone().unwrap_or_default(),
            PreferenceParams::File(file) => file.destination_path.clone(),
            PreferenceParams::Service(service) => service.service_name.clone(),
        }
    }

    /// Serialize the entry element
    pub fn to_xml(&self) -> String {
        match &self.params {
            PreferenceParams::ScheduledTask(task) => task_xml(task, &self.stamp, self.scope),
            PreferenceParams::File(file) => file_xml(file, &self.stamp),
            PreferenceParams::Service(service) => service_xml(service, &self.stamp),
        }
    }
}

fn task_xml(task: &TaskParams, stamp: &EntryStamp, scope: GpoScope) -> String {
    let kind = PreferenceKind::ScheduledTask;
    let name = escape(task.name.as_deref().unwrap_or_default());
    let description = partial_escape(task.description.as_deref().unwrap_or_default());
    let (shell, arguments) = task.shell.wrap(&task.command);
    let arguments = partial_escape(&arguments);

    let (run_as, logon_type) = match scope {
        GpoScope::Machine => ("NT AUTHORITY\\System", "S4U"),
        GpoScope::User => ("%LogonDomain%\\%LogonUser%", "InteractiveToken"),
    };

    format!(
        concat!(
            r#"<{tag} clsid="{clsid}" name="{name}" image="0" changed="{changed}" uid="{uid}" userContext="0" removePolicy="0">"#,
            r#"<Properties action="C" name="{name}" runAs="{run_as}" logonType="{logon_type}">"#,
            r#"<Task version="1.3">"#,
            r#"<RegistrationInfo><Author>{run_as}</Author><Description>{description}</Description></RegistrationInfo>"#,
            r#"<Principals><Principal id="Author"><UserId>{run_as}</UserId><LogonType>{logon_type}</LogonType><RunLevel>HighestAvailable</RunLevel></Principal></Principals>"#,
            r#"<Settings><IdleSettings><Duration>PT10M</Duration><WaitTimeout>PT1H</WaitTimeout><StopOnIdleEnd>true</StopOnIdleEnd><RestartOnIdle>false</RestartOnIdle></IdleSettings>"#,
            r#"<MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy><DisallowStartIfOnBatteries>true</DisallowStartIfOnBatteries><StopIfGoingOnBatteries>true</StopIfGoingOnBatteries>"#,
            r#"<AllowHardTerminate>true</AllowHardTerminate><StartWhenAvailable>true</StartWhenAvailable><RunOnlyIfNetworkAvailable>false</RunOnlyIfNetworkAvailable>"#,
            r#"<AllowStartOnDemand>true</AllowStartOnDemand><Enabled>true</Enabled><Hidden>false</Hidden><RunOnlyIfIdle>false</RunOnlyIfIdle><WakeToRun>false</WakeToRun>"#,
            r#"<ExecutionTimeLimit>P3D</ExecutionTimeLimit><Priority>7</Priority><DeleteExpiredTaskAfter>PT0S</DeleteExpiredTaskAfter></Settings>"#,
            r#"<Triggers><TimeTrigger><StartBoundary>%LocalTimeXmlEx%</StartBoundary><EndBoundary>%LocalTimeXmlEx%</EndBoundary><Enabled>true</Enabled></TimeTrigger></Triggers>"#,
            r#"<Actions Context="Author"><Exec><Command>{shell}</Command><Arguments>{arguments}</Arguments></Exec></Actions>"#,
            r#"</Task></Properties></{tag}>"#,
        ),
        tag = kind.entry_tag(),
        clsid = kind.entry_clsid(),
        name = name,
        changed = escape(&stamp.changed),
        uid = stamp.uid,
        run_as = run_as,
        logon_type = logon_type,
        description = description,
        shell = shell,
        arguments = arguments,
    )
}

fn file_xml(file: &FileParams, stamp: &EntryStamp) -> String {
    let kind = PreferenceKind::File;
    let file_name = escape(windows_file_name(&file.destination_path));

    format!(
        concat!(
            r#"<{tag} clsid="{clsid}" name="{file_name}" status="{file_name}" image="0" changed="{changed}" uid="{uid}" bypassErrors="1">"#,
            r#"<Properties action="{action}" fromPath="{from}" targetPath="{target}" readOnly="0" archive="1" hidden="0"/>"#,
            r#"</{tag}>"#,
        ),
        tag = kind.entry_tag(),
        clsid = kind.entry_clsid(),
        file_name = file_name,
        changed = escape(&stamp.changed),
        uid = stamp.uid,
        action = file.action.code(),
        from = escape(&file.source_path),
        target = escape(&file.destination_path),
    )
}

fn service_xml(service: &ServiceParams, stamp: &EntryStamp) -> String {
    let kind = PreferenceKind::Service;
    let service_name = escape(&service.service_name);

    format!(
        concat!(
            r#"<{tag} clsid="{clsid}" name="{service_name}" image="0" changed="{changed}" uid="{uid}" userContext="0" removePolicy="0">"#,
            r#"<Properties startupType="NOCHANGE" serviceName="{service_name}" serviceAction="{action}" timeout="30"/>"#,
            r#"</{tag}>"#,
        ),
        tag = kind.entry_tag(),
        clsid = kind.entry_clsid(),
        service_name = service_name,
        changed = escape(&stamp.changed),
        uid = stamp.uid,
        action = service.action.code(),
    )
}

fn fresh_document(kind: PreferenceKind, entry_xml: &str) -> String {
    format!(
        r#"{}<{} clsid="{}">{}</{}>"#,
        XML_DECLARATION,
        kind.envelope_tag(),
        kind.envelope_clsid(),
        entry_xml,
        kind.envelope_tag(),
    )
}

/// Produce the document body holding `entry`.
///
/// With no existing body a fresh document is built; otherwise the entry is
/// inserted right before the single envelope closing tag and every other byte
/// is kept as is. An empty envelope written as a self-closing root is opened
/// up around the entry.
pub fn render_document(existing: Option<&str>, entry: &PreferenceEntry) -> AppResult<String> {
    let kind = entry.kind();
    let entry_xml = entry.to_xml();

    let Some(existing) = existing else {
        return Ok(fresh_document(kind, &entry_xml));
    };

    let malformed = |found: &str| AppError::MalformedExistingDocument {
        document: kind.document_name().to_string(),
        reason: format!(
            "expected exactly one </{}> closing tag, found {}",
            kind.envelope_tag(),
            found
        ),
    };

    let pattern = close_tag_pattern(kind);
    let mut closing_tags = pattern.find_iter(existing);
    let close = match (closing_tags.next(), closing_tags.next()) {
        (Some(close), None) => close,
        (Some(_), Some(_)) => return Err(malformed("several")),
        (None, _) => {
            return expand_empty_envelope(kind, existing, &entry_xml)
                .ok_or_else(|| malformed("none"));
        }
    };

    let mut spliced = String::with_capacity(existing.len() + entry_xml.len());
    spliced.push_str(&existing[..close.start()]);
    spliced.push_str(&entry_xml);
    spliced.push_str(&existing[close.start()..]);

    tracing::debug!(
        document = kind.document_name(),
        previous_len = existing.len(),
        new_len = spliced.len(),
        "Spliced entry into existing document"
    );

    Ok(spliced)
}

/// Open a self-closing root (`<Files clsid=".."/>`) around `entry_xml`.
///
/// Returns `None` when the root element is not a self-closing envelope.
fn expand_empty_envelope(kind: PreferenceKind, existing: &str, entry_xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(existing);

    let (start, end) = loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Empty(e)) if e.name().as_ref() == kind.envelope_tag().as_bytes() => {
                break (start, reader.buffer_position() as usize);
            }
            Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) | Event::Text(_)) => {}
            _ => return None,
        }
    };

    let open_tag = existing.get(start..end)?.strip_suffix("/>")?;

    let mut expanded = String::with_capacity(existing.len() + entry_xml.len() + 16);
    expanded.push_str(&existing[..start]);
    expanded.push_str(open_tag);
    expanded.push('>');
    expanded.push_str(entry_xml);
    expanded.push_str("</");
    expanded.push_str(kind.envelope_tag());
    expanded.push('>');
    expanded.push_str(&existing[end..]);

    tracing::debug!(
        document = kind.document_name(),
        "Expanded self-closing envelope"
    );

    Some(expanded)
}

/// Build a new document containing only `entry`
pub fn build_fresh(entry: &PreferenceEntry) -> String {
    fresh_document(entry.kind(), &entry.to_xml())
}

/// Insert `entry` into an existing document body
pub fn splice_into_existing(existing: &str, entry: &PreferenceEntry) -> AppResult<String> {
    render_document(Some(existing), entry)
}

/// Entry being collected while walking the document
struct PendingEntry {
    element: String,
    name: Option<String>,
    properties: Option<Properties>,
}

#[derive(Default)]
struct Properties {
    action: Option<String>,
    name: Option<String>,
    from_path: Option<String>,
    target_path: Option<String>,
    service_name: Option<String>,
}

impl PendingEntry {
    fn finish(self, kind: PreferenceKind) -> EntrySummary {
        let props = self.properties.unwrap_or_default();
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_string());

        match kind {
            PreferenceKind::ScheduledTask => EntrySummary::ScheduledTask {
                action: or_unknown(props.action),
                name: or_unknown(props.name.or(self.name)),
                task_type: self.element,
            },
            PreferenceKind::File => EntrySummary::File {
                source: or_unknown(props.from_path),
                destination: or_unknown(props.target_path),
            },
            PreferenceKind::Service => EntrySummary::Service {
                service_name: or_unknown(props.service_name),
            },
        }
    }
}

fn get_attr(e: &BytesStart, name: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| format!("invalid attribute: {}", e))?;
        if attr.key.as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|e| format!("invalid attribute value: {}", e))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// List the entries of an existing document.
///
/// Fails with `MalformedExistingDocument` when the body is not well-formed XML
/// or its root is not this kind's envelope.
pub fn parse_existing(kind: PreferenceKind, body: &str) -> AppResult<Vec<EntrySummary>> {
    let malformed = |reason: String| AppError::MalformedExistingDocument {
        document: kind.document_name().to_string(),
        reason,
    };

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut root_seen = false;
    let mut current: Option<PendingEntry> = None;

    loop {
        let (element, is_empty) = match reader.read_event() {
            Ok(Event::Start(e)) => (e, false),
            Ok(Event::Empty(e)) => (e, true),
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some(entry) = current.take() {
                        entries.push(entry.finish(kind));
                    }
                }
                continue;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(malformed(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => continue,
        };

        match depth {
            0 => {
                let name = element_name(&element);
                if root_seen || name != kind.envelope_tag() {
                    return Err(malformed(format!(
                        "unexpected root element <{}>, expected <{}>",
                        name,
                        kind.envelope_tag()
                    )));
                }
                root_seen = true;
            }
            1 => {
                current = Some(PendingEntry {
                    element: element_name(&element),
                    name: get_attr(&element, b"name").map_err(&malformed)?,
                    properties: None,
                });
            }
            2 if element.name().as_ref() == b"Properties" => {
                if let Some(entry) = current.as_mut() {
                    entry.properties = Some(Properties {
                        action: get_attr(&element, b"action").map_err(&malformed)?,
                        name: get_attr(&element, b"name").map_err(&malformed)?,
                        from_path: get_attr(&element, b"fromPath").map_err(&malformed)?,
                        target_path: get_attr(&element, b"targetPath").map_err(&malformed)?,
                        service_name: get_attr(&element, b"serviceName").map_err(&malformed)?,
                    });
                }
            }
            _ => {}
        }

        if is_empty {
            if depth == 1 {
                if let Some(entry) = current.take() {
                    entries.push(entry.finish(kind));
                }
            }
        } else {
            depth += 1;
        }
    }

    if !root_seen {
        return Err(malformed("document has no root element".to_string()));
    }
    if depth != 0 {
        return Err(malformed(format!(
            "document ends inside {} open element(s)",
            depth
        )));
    }

    Ok(entries)
}
