//! Typed stanza model and its XML form.
//!
//! Only the attributes and children the gateway actually uses are modeled:
//! `from`/`to`/`type`/`id`, `body`, `subject`, `status`, `show`, the MUC
//! `x` extension, and stanza errors.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Namespace of the MUC join request extension.
pub const NS_MUC: &str = "http://jabber.org/protocol/muc";
/// Namespace of the MUC user extension (presence items, status codes).
pub const NS_MUC_USER: &str = "http://jabber.org/protocol/muc#user";
/// Namespace of stanza error conditions.
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Stanza parse failures.
#[derive(Debug, Error)]
pub enum StanzaParseError {
    /// The XML could not be walked.
    #[error("malformed stanza: {0}")]
    Xml(String),
    /// The root element is not message/presence/iq.
    #[error("unknown stanza element: {0}")]
    UnknownElement(String),
}

/// The three stanza kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StanzaKind {
    /// `<message/>`
    Message,
    /// `<presence/>`
    Presence,
    /// `<iq/>`
    Iq,
}

impl StanzaKind {
    fn tag(self) -> &'static str {
        match self {
            StanzaKind::Message => "message",
            StanzaKind::Presence => "presence",
            StanzaKind::Iq => "iq",
        }
    }
}

/// `<x xmlns="...muc#user">` payload on presence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MucUser {
    /// Item affiliation (`admin`, `member`, `none`, ...).
    pub affiliation: Option<String>,
    /// Item role (`moderator`, `participant`, `none`, ...).
    pub role: Option<String>,
    /// MUC status codes (110 self, 303 nick change, 307 kick, ...).
    pub status_codes: Vec<u16>,
    /// Item nick, used for nick-change announcements.
    pub item_nick: Option<String>,
    /// Actor nick, used for kicks.
    pub actor: Option<String>,
    /// Reason text inside the item.
    pub reason: Option<String>,
}

/// Stanza-level error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StanzaError {
    /// Error type attribute (`cancel`, `modify`, ...).
    pub typ: String,
    /// Defined condition element name.
    pub condition: String,
    /// Optional human-readable text.
    pub text: Option<String>,
}

/// One stanza, as the bridge sees it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stanza {
    /// Stanza kind.
    pub kind: Option<StanzaKind>,
    /// `from` attribute.
    pub from: Option<String>,
    /// `to` attribute.
    pub to: Option<String>,
    /// `type` attribute.
    pub typ: Option<String>,
    /// `id` attribute.
    pub id: Option<String>,
    /// `<body>` text.
    pub body: Option<String>,
    /// `<subject>` text.
    pub subject: Option<String>,
    /// `<status>` text (presence).
    pub status: Option<String>,
    /// `<show>` text (presence).
    pub show: Option<String>,
    /// A MUC join request `<x xmlns="...muc"/>` was present.
    pub muc_join: bool,
    /// `<password>` inside the MUC join request.
    pub muc_password: Option<String>,
    /// MUC user payload for outbound presence.
    pub muc_user: Option<MucUser>,
    /// Stanza error payload.
    pub error: Option<StanzaError>,
}

impl Stanza {
    fn base(kind: StanzaKind, from: &str, to: &str) -> Self {
        Stanza {
            kind: Some(kind),
            from: Some(from.to_owned()),
            to: Some(to.to_owned()),
            ..Default::default()
        }
    }

    /// Group chat message with a body.
    pub fn groupchat(from: &str, to: &str, body: &str) -> Self {
        let mut st = Self::base(StanzaKind::Message, from, to);
        st.typ = Some("groupchat".to_owned());
        st.body = Some(body.to_owned());
        st
    }

    /// Group chat subject change.
    pub fn subject(from: &str, to: &str, subject: &str) -> Self {
        let mut st = Self::base(StanzaKind::Message, from, to);
        st.typ = Some("groupchat".to_owned());
        st.subject = Some(subject.to_owned());
        st
    }

    /// One-to-one chat message.
    pub fn chat(from: &str, to: &str, body: &str) -> Self {
        let mut st = Self::base(StanzaKind::Message, from, to);
        st.typ = Some("chat".to_owned());
        st.body = Some(body.to_owned());
        st
    }

    /// MUC participant presence.
    pub fn muc_presence(from: &str, to: &str, muc: MucUser) -> Self {
        let mut st = Self::base(StanzaKind::Presence, from, to);
        st.muc_user = Some(muc);
        st
    }

    /// MUC unavailable presence.
    pub fn muc_unavailable(from: &str, to: &str, status: Option<&str>, muc: MucUser) -> Self {
        let mut st = Self::base(StanzaKind::Presence, from, to);
        st.typ = Some("unavailable".to_owned());
        st.status = status.map(str::to_owned);
        st.muc_user = Some(muc);
        st
    }

    /// Presence error with a defined condition.
    pub fn presence_error(from: &str, to: &str, typ: &str, condition: &str, text: &str) -> Self {
        let mut st = Self::base(StanzaKind::Presence, from, to);
        st.typ = Some("error".to_owned());
        st.error = Some(StanzaError {
            typ: typ.to_owned(),
            condition: condition.to_owned(),
            text: (!text.is_empty()).then(|| text.to_owned()),
        });
        st
    }

    /// Serialize to markup.
    pub fn to_xml(&self) -> String {
        let kind = self.kind.unwrap_or(StanzaKind::Message);
        let mut out = String::with_capacity(128);
        out.push('<');
        out.push_str(kind.tag());
        for (attr, value) in [
            ("from", &self.from),
            ("to", &self.to),
            ("type", &self.typ),
            ("id", &self.id),
        ] {
            if let Some(v) = value {
                out.push_str(&format!(" {}='{}'", attr, escape(v.as_str())));
            }
        }
        let mut inner = String::new();
        if let Some(show) = &self.show {
            inner.push_str(&format!("<show>{}</show>", escape(show.as_str())));
        }
        if let Some(status) = &self.status {
            inner.push_str(&format!("<status>{}</status>", escape(status.as_str())));
        }
        if let Some(body) = &self.body {
            inner.push_str(&format!("<body>{}</body>", escape(body.as_str())));
        }
        if let Some(subject) = &self.subject {
            inner.push_str(&format!("<subject>{}</subject>", escape(subject.as_str())));
        }
        if let Some(muc) = &self.muc_user {
            inner.push_str(&format!("<x xmlns='{NS_MUC_USER}'>"));
            inner.push_str("<item");
            if let Some(aff) = &muc.affiliation {
                inner.push_str(&format!(" affiliation='{}'", escape(aff.as_str())));
            }
            if let Some(role) = &muc.role {
                inner.push_str(&format!(" role='{}'", escape(role.as_str())));
            }
            if let Some(nick) = &muc.item_nick {
                inner.push_str(&format!(" nick='{}'", escape(nick.as_str())));
            }
            if muc.actor.is_some() || muc.reason.is_some() {
                inner.push('>');
                if let Some(actor) = &muc.actor {
                    inner.push_str(&format!("<actor nick='{}'/>", escape(actor.as_str())));
                }
                if let Some(reason) = &muc.reason {
                    inner.push_str(&format!("<reason>{}</reason>", escape(reason.as_str())));
                }
                inner.push_str("</item>");
            } else {
                inner.push_str("/>");
            }
            for code in &muc.status_codes {
                inner.push_str(&format!("<status code='{code}'/>"));
            }
            inner.push_str("</x>");
        }
        if let Some(err) = &self.error {
            inner.push_str(&format!("<error type='{}'>", escape(err.typ.as_str())));
            inner.push_str(&format!("<{} xmlns='{NS_STANZAS}'/>", err.condition));
            if let Some(text) = &err.text {
                inner.push_str(&format!(
                    "<text xmlns='{NS_STANZAS}'>{}</text>",
                    escape(text.as_str())
                ));
            }
            inner.push_str("</error>");
        }

        if inner.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&inner);
            out.push_str("</");
            out.push_str(kind.tag());
            out.push('>');
        }
        out
    }

    /// Parse one stanza element.
    pub fn parse(xml: &str) -> Result<Self, StanzaParseError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().check_end_names = false;

        let mut stanza = Stanza::default();
        let mut depth = 0usize;
        let mut text = String::new();
        let mut in_muc_x = false;
        let mut child: Option<String> = None;
        let mut grandchild: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = element_name(&e);
                    open_element(&mut stanza, &name, &e, depth, &mut in_muc_x, false)?;
                    if depth == 1 {
                        child = Some(name.clone());
                        text.clear();
                    } else if depth == 2 {
                        grandchild = Some(name.clone());
                        text.clear();
                    }
                    depth += 1;
                }
                Ok(Event::Empty(e)) => {
                    let name = element_name(&e);
                    open_element(&mut stanza, &name, &e, depth, &mut in_muc_x, true)?;
                    if depth == 0 {
                        // Self-closing root like <presence/>.
                        return Ok(stanza);
                    }
                }
                Ok(Event::Text(t)) => {
                    let piece = t
                        .unescape()
                        .map_err(|e| StanzaParseError::Xml(e.to_string()))?;
                    text.push_str(&piece);
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    if depth == 2 {
                        match grandchild.as_deref() {
                            Some("password") if in_muc_x => {
                                stanza.muc_password = Some(text.clone())
                            }
                            Some("text") => {
                                if let Some(err) = &mut stanza.error {
                                    err.text = Some(text.clone());
                                }
                            }
                            _ => {}
                        }
                        grandchild = None;
                        text.clear();
                    } else if depth == 1 {
                        match child.as_deref() {
                            Some("body") => stanza.body = Some(text.clone()),
                            Some("subject") => stanza.subject = Some(text.clone()),
                            Some("status") => stanza.status = Some(text.clone()),
                            Some("show") => stanza.show = Some(text.clone()),
                            Some("x") => in_muc_x = false,
                            _ => {}
                        }
                        child = None;
                        text.clear();
                    } else if depth == 0 {
                        return Ok(stanza);
                    }
                }
                Ok(Event::Eof) => return Ok(stanza),
                Ok(_) => {}
                Err(e) => return Err(StanzaParseError::Xml(e.to_string())),
            }
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn open_element(
    stanza: &mut Stanza,
    name: &str,
    e: &BytesStart<'_>,
    depth: usize,
    in_muc_x: &mut bool,
    is_empty: bool,
) -> Result<(), StanzaParseError> {
    match depth {
        0 => {
            stanza.kind = Some(match name {
                "message" => StanzaKind::Message,
                "presence" => StanzaKind::Presence,
                "iq" => StanzaKind::Iq,
                other => return Err(StanzaParseError::UnknownElement(other.to_owned())),
            });
            for attr in e.attributes().flatten() {
                let value = String::from_utf8_lossy(&attr.value).into_owned();
                match attr.key.as_ref() {
                    b"from" => stanza.from = Some(value),
                    b"to" => stanza.to = Some(value),
                    b"type" => stanza.typ = Some(value),
                    b"id" => stanza.id = Some(value),
                    _ => {}
                }
            }
        }
        1 => match name {
            "x" => {
                let xmlns = attr_value(e, "xmlns").unwrap_or_default();
                if xmlns == NS_MUC {
                    stanza.muc_join = true;
                    if !is_empty {
                        *in_muc_x = true;
                    }
                } else if xmlns == NS_MUC_USER {
                    stanza.muc_user.get_or_insert_with(Default::default);
                }
            }
            "error" => {
                stanza.error = Some(StanzaError {
                    typ: attr_value(e, "type").unwrap_or_default(),
                    condition: String::new(),
                    text: None,
                });
            }
            _ => {}
        },
        2 => {
            if name != "text" && name != "password" {
                if let Some(err) = &mut stanza.error {
                    if err.condition.is_empty() {
                        err.condition = name.to_owned();
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn attr_value(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_presence_join_with_password() {
        let xml = "<presence from='user@ex.org/res' to='#c%irc.net@gw.ex/nick'>\
                   <x xmlns='http://jabber.org/protocol/muc'><password>sekrit</password></x>\
                   </presence>";
        let st = Stanza::parse(xml).unwrap();
        assert_eq!(st.kind, Some(StanzaKind::Presence));
        assert_eq!(st.from.as_deref(), Some("user@ex.org/res"));
        assert!(st.muc_join);
        assert_eq!(st.muc_password.as_deref(), Some("sekrit"));
        assert!(st.typ.is_none());
    }

    #[test]
    fn parse_groupchat_message() {
        let xml = "<message from='u@d/r' to='#c%s@gw' type='groupchat'>\
                   <body>hello &amp; goodbye</body><subject>topic</subject></message>";
        let st = Stanza::parse(xml).unwrap();
        assert_eq!(st.kind, Some(StanzaKind::Message));
        assert_eq!(st.typ.as_deref(), Some("groupchat"));
        assert_eq!(st.body.as_deref(), Some("hello & goodbye"));
        assert_eq!(st.subject.as_deref(), Some("topic"));
    }

    #[test]
    fn parse_self_closing_presence() {
        let st = Stanza::parse("<presence from='a@b' to='c@d' type='unavailable'/>").unwrap();
        assert_eq!(st.typ.as_deref(), Some("unavailable"));
    }

    #[test]
    fn parse_error_stanza() {
        let xml = "<message type='error' from='a@b'><error type='cancel'>\
                   <service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                   <text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>nope</text>\
                   </error></message>";
        let st = Stanza::parse(xml).unwrap();
        let err = st.error.unwrap();
        assert_eq!(err.typ, "cancel");
        assert_eq!(err.condition, "service-unavailable");
        assert_eq!(err.text.as_deref(), Some("nope"));
    }

    #[test]
    fn unknown_root_is_rejected() {
        assert!(matches!(
            Stanza::parse("<bogus/>"),
            Err(StanzaParseError::UnknownElement(_))
        ));
    }

    #[test]
    fn serialized_presence_roundtrips() {
        let muc = MucUser {
            affiliation: Some("admin".to_owned()),
            role: Some("moderator".to_owned()),
            status_codes: vec![110],
            ..Default::default()
        };
        let st = Stanza::muc_presence("#c%s@gw/alice", "user@ex.org", muc);
        let xml = st.to_xml();
        assert!(xml.contains("affiliation='admin'"));
        assert!(xml.contains("<status code='110'/>"));

        let parsed = Stanza::parse(&xml).unwrap();
        assert_eq!(parsed.kind, Some(StanzaKind::Presence));
        assert_eq!(parsed.from.as_deref(), Some("#c%s@gw/alice"));
        // Inbound parsing keeps the x element only as a marker.
        assert!(parsed.muc_user.is_some());
    }

    #[test]
    fn body_text_is_escaped() {
        let st = Stanza::groupchat("a@b", "c@d", "a < b & c");
        let xml = st.to_xml();
        assert!(xml.contains("a &lt; b &amp; c"));
        let parsed = Stanza::parse(&xml).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("a < b & c"));
    }

    #[test]
    fn error_builder_serializes_condition() {
        let st = Stanza::presence_error("#c%s@gw", "u@d", "cancel", "item-not-found", "gone");
        let xml = st.to_xml();
        assert!(xml.contains("type='error'"));
        assert!(xml.contains("<item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>"));
        assert!(xml.contains("<text"));
    }
}
