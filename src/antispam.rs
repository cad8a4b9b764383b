//! Honeypot form-field generator and submission normalizer.
//!
//! For each semantic field the generator emits a handful of decoy input
//! names plus one real one, all sharing the shape
//! `<prefix><hex><marker><hex><class>` where `class` is a trailing
//! character (`C`omment, `R`eply-to, `T`ag-entry, `U`pload) and `marker` is
//! drawn from either a "display" or "hide" set of integers the client's CSS
//! keys off of. Submitting a value under any name but the recorded real one
//! for its class bans the submitter.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::SpamTrap;
use crate::error::AdmitError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldClass {
    Comment,
    ReplyTo,
    TagEntry,
    Upload,
}

impl FieldClass {
    fn suffix(self) -> char {
        match self {
            FieldClass::Comment => 'C',
            FieldClass::ReplyTo => 'R',
            FieldClass::TagEntry => 'T',
            FieldClass::Upload => 'U',
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'C' => Some(FieldClass::Comment),
            'R' => Some(FieldClass::ReplyTo),
            'T' => Some(FieldClass::TagEntry),
            'U' => Some(FieldClass::Upload),
            _ => None,
        }
    }
}

/// The real field names recorded for one generated form. Absent fields are
/// simply not part of that form (e.g. `reply_to` on an index-page form).
#[derive(Clone, Debug, Default)]
pub struct FieldNames {
    pub comment: Option<String>,
    pub reply_to: Option<String>,
    pub tag_entry: Option<String>,
    pub upload: Option<String>,
}

impl FieldNames {
    fn slot_mut(&mut self, class: FieldClass) -> &mut Option<String> {
        match class {
            FieldClass::Comment => &mut self.comment,
            FieldClass::ReplyTo => &mut self.reply_to,
            FieldClass::TagEntry => &mut self.tag_entry,
            FieldClass::Upload => &mut self.upload,
        }
    }

    fn is_empty(&self) -> bool {
        self.comment.is_none()
            && self.reply_to.is_none()
            && self.tag_entry.is_none()
            && self.upload.is_none()
    }
}

/// A rendered form: field names to emit in HTML (out of scope to render
/// here, just to generate) plus the record of which name is real per class.
pub struct GeneratedForm {
    pub real: FieldNames,
    /// Every name generated for every class, in generation order, including
    /// the real ones — what the (out of scope) template would emit as
    /// inputs.
    pub all_names: Vec<(FieldClass, String)>,
}

fn random_name(cfg: &SpamTrap, class: FieldClass, rng: &mut impl Rng) -> String {
    let markers: Vec<u32> =
        cfg.field_display.iter().chain(cfg.field_hide.iter()).copied().collect();
    let marker = if markers.is_empty() { 0 } else { *markers.choose(rng).unwrap() };
    format!("{}{:x}{}{:x}{}", cfg.field_prefix, rng.gen::<u32>(), marker, rng.gen::<u32>(), class.suffix())
}

fn generate_class(
    cfg: &SpamTrap,
    class: FieldClass,
    rng: &mut impl Rng,
    out: &mut Vec<(FieldClass, String)>,
) -> String {
    let n_decoys = cfg.duplicate_fields;
    let real_index = rng.gen_range(0..=n_decoys);
    let mut real_name = String::new();

    for i in 0..=n_decoys {
        let name = random_name(cfg, class, rng);
        if i == real_index {
            real_name = name.clone();
        }
        out.push((class, name));
    }

    real_name
}

/// Generates a per-thread form: comment, upload and reply-to fields.
pub fn generate_thread_form(cfg: &SpamTrap, rng: &mut impl Rng) -> GeneratedForm {
    let mut all_names = Vec::new();
    let comment = generate_class(cfg, FieldClass::Comment, rng, &mut all_names);
    let reply_to = generate_class(cfg, FieldClass::ReplyTo, rng, &mut all_names);
    let upload = generate_class(cfg, FieldClass::Upload, rng, &mut all_names);

    GeneratedForm {
        real: FieldNames {
            comment: Some(comment),
            reply_to: Some(reply_to),
            tag_entry: None,
            upload: Some(upload),
        },
        all_names,
    }
}

/// Generates an index-page form: comment, upload and tag-entry fields (no
/// reply-to, since an index page isn't a reply target).
pub fn generate_index_form(cfg: &SpamTrap, rng: &mut impl Rng) -> GeneratedForm {
    let mut all_names = Vec::new();
    let comment = generate_class(cfg, FieldClass::Comment, rng, &mut all_names);
    let tag_entry = generate_class(cfg, FieldClass::TagEntry, rng, &mut all_names);
    let upload = generate_class(cfg, FieldClass::Upload, rng, &mut all_names);

    GeneratedForm {
        real: FieldNames {
            comment: Some(comment),
            reply_to: None,
            tag_entry: Some(tag_entry),
            upload: Some(upload),
        },
        all_names,
    }
}

/// Holds the current and immediately-previous generation of the index-page
/// form, so submissions against a form that was still displayed at request
/// time continue to validate through one regeneration.
pub struct IndexForms {
    current: FieldNames,
    previous: FieldNames,
    generated_at: Instant,
}

impl IndexForms {
    pub fn new(cfg: &SpamTrap, rng: &mut impl Rng) -> Self {
        let current = generate_index_form(cfg, rng).real;
        Self { current, previous: FieldNames::default(), generated_at: Instant::now() }
    }

    /// Regenerates the form if the current generation is older than the
    /// configured lifetime, sliding the old generation into `previous`.
    pub fn refresh(&mut self, cfg: &SpamTrap, lifetime: Duration, rng: &mut impl Rng) {
        if self.generated_at.elapsed() < lifetime {
            return;
        }
        self.previous = std::mem::take(&mut self.current);
        self.current = generate_index_form(cfg, rng).real;
        self.generated_at = Instant::now();
    }

    pub fn current(&self) -> &FieldNames {
        &self.current
    }
}

/// Looks up which class `name` belongs to (by trailing suffix), then checks
/// whether it matches the real name recorded for that class in any of
/// `generations`.
fn classify_and_validate(name: &str, generations: &[&FieldNames]) -> Option<FieldClass> {
    let class = FieldClass::from_suffix(name.chars().last()?)?;
    for gen in generations {
        if gen.slot(class).as_deref() == Some(name) {
            return Some(class);
        }
    }
    None
}

impl FieldNames {
    fn slot(&self, class: FieldClass) -> &Option<String> {
        match class {
            FieldClass::Comment => &self.comment,
            FieldClass::ReplyTo => &self.reply_to,
            FieldClass::TagEntry => &self.tag_entry,
            FieldClass::Upload => &self.upload,
        }
    }
}

/// Normalizes a submitted field set against the given form generation(s),
/// returning the canonical class → value map. A non-real name under the
/// configured prefix is a spam-trap hit; the caller is responsible for
/// issuing the ban.
pub fn normalize(
    cfg: &SpamTrap,
    generations: &[&FieldNames],
    fields: &[(String, String)],
) -> Result<HashMap<FieldClass, String>, AdmitError> {
    if generations.iter().all(|g| g.is_empty()) {
        return Err(AdmitError::InvalidFields);
    }

    let mut out = HashMap::new();

    for (name, value) in fields {
        if !name.starts_with(&cfg.field_prefix) || value.is_empty() {
            continue;
        }

        match classify_and_validate(name, generations) {
            Some(class) => {
                out.insert(class, value.clone());
            },
            None => return Err(AdmitError::SpamTrap),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn cfg() -> SpamTrap {
        SpamTrap {
            duplicate_fields: 3,
            field_display: vec![1, 2],
            field_hide: vec![3, 4],
            field_prefix: "f_".to_owned(),
            thread_form_lifetime: crate::config::DurationSetting(Duration::from_secs(60)),
        }
    }

    #[test]
    fn real_field_validates() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let form = generate_thread_form(&cfg(), &mut rng);
        let real_comment = form.real.comment.clone().unwrap();
        let fields = vec![(real_comment, "hello".to_owned())];
        let result = normalize(&cfg(), &[&form.real], &fields).unwrap();
        assert_eq!(result.get(&FieldClass::Comment).unwrap(), "hello");
    }

    #[test]
    fn decoy_field_is_spam_trap() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let form = generate_thread_form(&cfg(), &mut rng);
        let decoy = form
            .all_names
            .iter()
            .find(|(c, n)| *c == FieldClass::Comment && Some(n) != form.real.comment.as_ref())
            .unwrap()
            .1
            .clone();
        let fields = vec![(decoy, "spam".to_owned())];
        assert_eq!(normalize(&cfg(), &[&form.real], &fields), Err(AdmitError::SpamTrap));
    }

    #[test]
    fn empty_generation_is_invalid_fields() {
        let fields = vec![("f_123C".to_owned(), "x".to_owned())];
        let empty = FieldNames::default();
        assert_eq!(normalize(&cfg(), &[&empty], &fields), Err(AdmitError::InvalidFields));
    }
}
