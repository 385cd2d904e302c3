//! Markup-to-event driver.
//!
//! The real format parsers live outside this crate; they push events at
//! a writer. For embedders (and tests) that already hold XHTML or tag
//! soup as text, this driver tokenizes it with quick-xml and fires the
//! same event sequence a parser would. It is deliberately lenient:
//! mismatched end tags are passed through untouched (the filter writer
//! is the component responsible for repairing them).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::Result;
use crate::writer::ParserCallback;

/// Splits `prefix:local` markup names.
fn split_name(raw: &[u8]) -> (String, String) {
    let raw = String::from_utf8_lossy(raw);
    match raw.split_once(':') {
        Some((ns, local)) => (ns.to_string(), local.to_string()),
        None => (String::new(), raw.to_string()),
    }
}

fn fire_open(callback: &mut dyn ParserCallback, e: &BytesStart) {
    let (ns, name) = split_name(e.name().as_ref());
    callback.on_tag_open(&ns, &name.to_ascii_lowercase());
    for attr in e.attributes().flatten() {
        let (ans, aname) = split_name(attr.key.as_ref());
        let value = attr
            .unescape_value()
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned().into());
        callback.on_attribute(&ans, &aname, &value);
    }
    callback.on_tag_body();
}

/// Tokenizes `markup` and replays it into `callback`, `on_start`
/// through `on_stop` included.
pub fn feed_markup(callback: &mut dyn ParserCallback, markup: &str) -> Result<()> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    callback.on_start();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => fire_open(callback, &e),
            Ok(Event::Empty(e)) => {
                let (ns, name) = split_name(e.name().as_ref());
                let name = name.to_ascii_lowercase();
                fire_open(callback, &e);
                callback.on_tag_close(&ns, &name, true);
            }
            Ok(Event::End(e)) => {
                let (ns, name) = split_name(e.name().as_ref());
                callback.on_tag_close(&ns, &name.to_ascii_lowercase(), false);
            }
            Ok(Event::Text(t)) => {
                let decoded = t
                    .decode()
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned().into());
                let text = quick_xml::escape::unescape(&decoded)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| decoded.into_owned());
                if !text.is_empty() {
                    callback.on_text(&text, 0);
                }
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                callback.on_text(&text, 0);
            }
            Ok(Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_)) => {}
            Ok(Event::GeneralRef(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => {
                // Lossy by contract: log and stop feeding; whatever was
                // built so far stays valid.
                log::warn!("markup tokenizer error: {e}");
                break;
            }
        }
    }
    callback.on_stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ParserCallback for Recorder {
        fn on_start(&mut self) {
            self.events.push("start".into());
        }
        fn on_tag_open(&mut self, _ns: &str, name: &str) {
            self.events.push(format!("open {name}"));
        }
        fn on_attribute(&mut self, _ns: &str, name: &str, value: &str) {
            self.events.push(format!("attr {name}={value}"));
        }
        fn on_tag_body(&mut self) {
            self.events.push("body".into());
        }
        fn on_tag_close(&mut self, _ns: &str, name: &str, self_closing: bool) {
            self.events.push(format!("close {name} {self_closing}"));
        }
        fn on_text(&mut self, text: &str, _flags: u32) {
            self.events.push(format!("text {text}"));
        }
        fn on_blob(&mut self, _name: &str, _data: &[u8]) -> bool {
            true
        }
        fn on_doc_property(&mut self, _name: &str, _value: &str) {}
        fn on_stop(&mut self) {
            self.events.push("stop".into());
        }
    }

    #[test]
    fn test_event_sequence() {
        let mut rec = Recorder::default();
        feed_markup(&mut rec, r#"<p class="x">hi<br/></p>"#).unwrap();
        assert_eq!(
            rec.events,
            vec![
                "start",
                "open p",
                "attr class=x",
                "body",
                "text hi",
                "open br",
                "body",
                "close br true",
                "close p false",
                "stop",
            ]
        );
    }

    #[test]
    fn test_unbalanced_markup_still_streams() {
        let mut rec = Recorder::default();
        feed_markup(&mut rec, "<p>a<p>b").unwrap();
        assert!(rec.events.contains(&"text a".to_string()));
        assert!(rec.events.contains(&"text b".to_string()));
        assert_eq!(rec.events.last().unwrap(), "stop");
    }

    #[test]
    fn test_uppercase_names_lowered() {
        let mut rec = Recorder::default();
        feed_markup(&mut rec, "<DIV>x</DIV>").unwrap();
        assert!(rec.events.contains(&"open div".to_string()));
        assert!(rec.events.contains(&"close div false".to_string()));
    }
}
