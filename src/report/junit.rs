//! JUnit XML merge
//!
//! Each fragment holds one `<testsuite>` (optionally wrapped in
//! `<testsuites>`). The merged document is a single `<testsuite>` whose
//! counters are the sums over all fragments and whose children are every
//! fragment's `<testcase>` elements, in unit order.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::{error, warn};

use super::{MergeOptions, Merged, RawFragment};
use crate::error::FragmentError;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct SuiteTotals {
    tests: u64,
    failures: u64,
    errors: u64,
    skipped: u64,
    time: f64,
}

impl SuiteTotals {
    fn add(&mut self, other: &SuiteTotals) {
        self.tests += other.tests;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.time += other.time;
    }
}

/// A fully parsed fragment: its counters and its testcase events
struct SuiteFragment {
    totals: SuiteTotals,
    cases: Vec<Event<'static>>,
}

pub(crate) fn merge(fragments: &[RawFragment<'_>], options: &MergeOptions) -> Merged {
    let mut totals = SuiteTotals::default();
    let mut cases = Vec::new();
    let mut merged = 0;

    for fragment in fragments {
        let prefix = options.prefix_testcase_names.then_some(fragment.owner);
        match parse_fragment(&fragment.content, prefix) {
            Ok(suite) => {
                totals.add(&suite.totals);
                cases.extend(suite.cases);
                merged += 1;
            }
            Err(e) => warn!(
                "Dropping JUnit fragment {} of {}: {}",
                fragment.origin, fragment.owner, e
            ),
        }
    }

    let content = match write_suite(&options.suite_name, &totals, cases) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to write merged JUnit report: {}", e);
            Vec::new()
        }
    };
    Merged { content, merged }
}

fn parse_fragment(content: &[u8], prefix: Option<&str>) -> Result<SuiteFragment, FragmentError> {
    let mut reader = Reader::from_reader(content);
    reader.trim_text(true);

    let mut totals = SuiteTotals::default();
    let mut cases = Vec::new();
    let mut suites = 0;
    // Depth inside the current <testcase>, 0 when outside
    let mut case_depth = 0usize;

    loop {
        let event = reader.read_event()?;
        if case_depth > 0 {
            match &event {
                Event::Start(_) => case_depth += 1,
                Event::End(_) => case_depth -= 1,
                Event::Eof => {
                    return Err(FragmentError::Structure("unterminated <testcase>".into()))
                }
                _ => {}
            }
            cases.push(event.into_owned());
            continue;
        }

        match event {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"testsuite" => {
                totals.add(&suite_totals(&e)?);
                suites += 1;
            }
            Event::Start(e) if e.name().as_ref() == b"testcase" => {
                cases.push(Event::Start(testcase_start(&e, prefix)?));
                case_depth = 1;
            }
            Event::Empty(e) if e.name().as_ref() == b"testcase" => {
                cases.push(Event::Empty(testcase_start(&e, prefix)?));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if suites == 0 {
        return Err(FragmentError::Structure("no <testsuite> element".into()));
    }
    Ok(SuiteFragment { totals, cases })
}

fn suite_totals(suite: &BytesStart<'_>) -> Result<SuiteTotals, FragmentError> {
    let mut totals = SuiteTotals::default();
    for attr in suite.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?;
        let value = value.trim();
        match attr.key.as_ref() {
            b"tests" => totals.tests = parse_count("tests", value)?,
            b"failures" => totals.failures = parse_count("failures", value)?,
            b"errors" => totals.errors = parse_count("errors", value)?,
            b"skipped" => totals.skipped = parse_count("skipped", value)?,
            b"time" => {
                totals.time = value.parse().map_err(|_| {
                    FragmentError::Structure(format!("invalid time attribute {value:?}"))
                })?
            }
            _ => {}
        }
    }
    Ok(totals)
}

fn parse_count(name: &str, value: &str) -> Result<u64, FragmentError> {
    value
        .parse()
        .map_err(|_| FragmentError::Structure(format!("invalid {name} attribute {value:?}")))
}

/// Copy of a `<testcase>` start tag, with its name prefixed by `prefix`
fn testcase_start(
    case: &BytesStart<'_>,
    prefix: Option<&str>,
) -> Result<BytesStart<'static>, FragmentError> {
    let Some(prefix) = prefix else {
        return Ok(case.clone().into_owned());
    };

    let mut renamed = BytesStart::new("testcase");
    for attr in case.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"name" {
            let name = attr.unescape_value()?;
            renamed.push_attribute(("name", format!("{prefix}: {name}").as_str()));
        } else {
            renamed.push_attribute(attr);
        }
    }
    Ok(renamed)
}

fn write_suite(
    name: &str,
    totals: &SuiteTotals,
    cases: Vec<Event<'static>>,
) -> Result<Vec<u8>, FragmentError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", name));
    suite.push_attribute(("tests", totals.tests.to_string().as_str()));
    suite.push_attribute(("skipped", totals.skipped.to_string().as_str()));
    suite.push_attribute(("failures", totals.failures.to_string().as_str()));
    suite.push_attribute(("errors", totals.errors.to_string().as_str()));
    suite.push_attribute(("time", format!("{:.3}", totals.time).as_str()));

    if cases.is_empty() {
        writer.write_event(Event::Empty(suite))?;
    } else {
        writer.write_event(Event::Start(suite))?;
        for case in cases {
            writer.write_event(case)?;
        }
        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    }

    let mut content = writer.into_inner();
    content.push(b'\n');
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    const LOGIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="Cucumber" tests="2" skipped="0" failures="1" errors="0" time="1.250">
  <testcase classname="Login" name="Valid user" time="0.500">
    <system-out><![CDATA[Given a user.....passed]]></system-out>
  </testcase>
  <testcase classname="Login" name="Locked &amp; expired" time="0.750">
    <failure message="expected 200"><![CDATA[assertion failed]]></failure>
  </testcase>
</testsuite>
"#;

    const CHECKOUT: &str = r#"<testsuites>
  <testsuite name="Cucumber" tests="1" skipped="1" failures="0" errors="0" time="0.5">
    <testcase classname="Checkout" name="Empty cart" time="0.5"><skipped/></testcase>
  </testsuite>
</testsuites>"#;

    fn raw<'a>(owner: &'a str, content: &'a str) -> RawFragment<'a> {
        RawFragment {
            owner,
            origin: format!("{owner}.xml"),
            content: Cow::Borrowed(content.as_bytes()),
        }
    }

    fn suite_attributes(content: &[u8]) -> Vec<(String, String)> {
        let mut reader = Reader::from_reader(content);
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"testsuite" => {
                    return e
                        .attributes()
                        .map(|a| {
                            let a = a.unwrap();
                            (
                                String::from_utf8(a.key.as_ref().to_vec()).unwrap(),
                                a.unescape_value().unwrap().into_owned(),
                            )
                        })
                        .collect();
                }
                Event::Eof => panic!("no testsuite"),
                _ => {}
            }
        }
    }

    #[test]
    fn test_attributes_are_summed() {
        let merged = merge(
            &[raw("checkout", CHECKOUT), raw("login", LOGIN)],
            &MergeOptions::default(),
        );
        assert_eq!(merged.merged, 2);

        let attrs = suite_attributes(&merged.content);
        let get = |key: &str| attrs.iter().find(|(k, _)| k == key).unwrap().1.clone();
        assert_eq!(get("name"), "featurepool");
        assert_eq!(get("tests"), "3");
        assert_eq!(get("failures"), "1");
        assert_eq!(get("skipped"), "1");
        assert_eq!(get("errors"), "0");
        assert_eq!(get("time"), "1.750");

        let text = String::from_utf8(merged.content).unwrap();
        assert_eq!(text.matches("<testsuite ").count(), 1);
        assert_eq!(text.matches("<testcase ").count(), 3);
        assert!(!text.contains("<testsuites"));
        // Unit order: checkout before login
        assert!(text.find("Empty cart").unwrap() < text.find("Valid user").unwrap());
        assert!(text.contains("<![CDATA[assertion failed]]>"));
    }

    #[test]
    fn test_testcase_names_prefixed_on_request() {
        let options = MergeOptions {
            prefix_testcase_names: true,
            ..MergeOptions::default()
        };
        let merged = merge(&[raw("login-3", LOGIN)], &options);
        let text = String::from_utf8(merged.content).unwrap();

        assert!(text.contains(r#"name="login-3: Valid user""#));
        assert!(text.contains(r#"name="login-3: Locked &amp; expired""#));
        assert!(text.contains(r#"classname="Login""#));
    }

    #[test]
    fn test_names_untouched_by_default() {
        let merged = merge(&[raw("login-3", LOGIN)], &MergeOptions::default());
        let text = String::from_utf8(merged.content).unwrap();
        assert!(text.contains(r#"name="Valid user""#));
    }

    #[test]
    fn test_bad_fragment_is_dropped() {
        let merged = merge(
            &[
                raw("a", "<testsuite tests=\"1\"><testcase name=\"x\">"),
                raw("b", "<testsuite tests=\"many\"/>"),
                raw("c", "<report/>"),
                raw("login", LOGIN),
            ],
            &MergeOptions::default(),
        );
        assert_eq!(merged.merged, 1);

        let attrs = suite_attributes(&merged.content);
        assert!(attrs.contains(&("tests".to_string(), "2".to_string())));
    }

    #[test]
    fn test_no_fragments_yields_empty_suite() {
        let merged = merge(&[], &MergeOptions::default());
        let attrs = suite_attributes(&merged.content);
        assert!(attrs.contains(&("tests".to_string(), "0".to_string())));
    }
}
