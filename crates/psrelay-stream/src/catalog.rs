// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Static classification of structural events.
//
// Each known injection point has a display name (used inside the marker) and
// a policy. Points the upstream renders itself (page counts, bounding boxes,
// orientation...) are `Replace`: this system must never supplement them.
// Unknown ids are `Replace` too.

use psrelay_core::types::EventId;
use psrelay_core::types::InjectPolicy::{self, Inject, Replace};

/// Classification of one structural event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Display name embedded in markers, `None` for unknown ids.
    pub display_name: Option<&'static str>,
    pub policy: InjectPolicy,
}

impl Classification {
    pub fn is_inject(&self) -> bool {
        self.policy == InjectPolicy::Inject
    }
}

/// Known structural events, sorted by id.
const ENTRIES: &[(EventId, &str, InjectPolicy)] = &[
    (EventId::BEGIN_STREAM, "PSINJECT_BEGINSTREAM", Inject),
    (EventId::PS_ADOBE, "PSINJECT_PSADOBE", Inject),
    (EventId::PAGES_AT_END, "PSINJECT_PAGESATEND", Replace),
    (EventId::PAGES, "PSINJECT_PAGES", Replace),
    (EventId::DOC_NEEDED_RES, "PSINJECT_DOCNEEDEDRES", Inject),
    (EventId::DOC_SUPPLIED_RES, "PSINJECT_DOCSUPPLIEDRES", Inject),
    (EventId::PAGE_ORDER, "PSINJECT_PAGEORDER", Replace),
    (EventId::ORIENTATION, "PSINJECT_ORIENTATION", Replace),
    (EventId::BOUNDING_BOX, "PSINJECT_BOUNDINGBOX", Replace),
    (EventId::DOCUMENT_PROCESS_COLORS, "PSINJECT_DOCUMENTPROCESSCOLORS", Replace),
    (EventId::COMMENTS, "PSINJECT_COMMENTS", Inject),
    (EventId::BEGIN_DEFAULTS, "PSINJECT_BEGINDEFAULTS", Inject),
    (EventId::END_DEFAULTS, "PSINJECT_ENDDEFAULTS", Inject),
    (EventId::BEGIN_PROLOG, "PSINJECT_BEGINPROLOG", Inject),
    (EventId::END_PROLOG, "PSINJECT_ENDPROLOG", Inject),
    (EventId::BEGIN_SETUP, "PSINJECT_BEGINSETUP", Inject),
    (EventId::END_SETUP, "PSINJECT_ENDSETUP", Inject),
    (EventId::TRAILER, "PSINJECT_TRAILER", Inject),
    (EventId::EOF, "PSINJECT_EOF", Inject),
    (EventId::END_STREAM, "PSINJECT_ENDSTREAM", Inject),
    (
        EventId::DOCUMENT_PROCESS_COLORS_AT_END,
        "PSINJECT_DOCUMENTPROCESSCOLORSATEND",
        Replace,
    ),
    (EventId::PAGE_NUMBER, "PSINJECT_PAGENUMBER", Replace),
    (EventId::BEGIN_PAGE_SETUP, "PSINJECT_BEGINPAGESETUP", Inject),
    (EventId::END_PAGE_SETUP, "PSINJECT_ENDPAGESETUP", Inject),
    (EventId::PAGE_TRAILER, "PSINJECT_PAGETRAILER", Inject),
    (EventId::PLATE_COLOR, "PSINJECT_PLATECOLOR", Replace),
    (EventId::SHOW_PAGE, "PSINJECT_SHOWPAGE", Replace),
    (EventId::PAGE_BBOX, "PSINJECT_PAGEBBOX", Replace),
    (EventId::END_PAGE_COMMENTS, "PSINJECT_ENDPAGECOMMENTS", Inject),
    (EventId::VM_SAVE, "PSINJECT_VMSAVE", Inject),
    (EventId::VM_RESTORE, "PSINJECT_VMRESTORE", Inject),
];

/// Lookup table from event id to name and policy. Immutable.
#[derive(Debug, Clone, Copy)]
pub struct MarkerCatalog {
    entries: &'static [(EventId, &'static str, InjectPolicy)],
}

impl Default for MarkerCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl MarkerCatalog {
    /// The catalog of the host driver's injection points.
    pub const fn standard() -> Self {
        Self { entries: ENTRIES }
    }

    /// Classify `event`. Unknown ids are pass-through.
    pub fn classify(&self, event: EventId) -> Classification {
        match self.entries.binary_search_by_key(&event, |(id, _, _)| *id) {
            Ok(idx) => {
                let (_, name, policy) = self.entries[idx];
                Classification {
                    display_name: Some(name),
                    policy,
                }
            }
            Err(_) => Classification {
                display_name: None,
                policy: Replace,
            },
        }
    }

    /// Display name of `event`, if known.
    pub fn name(&self, event: EventId) -> Option<&'static str> {
        self.classify(event).display_name
    }

    /// All known entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (EventId, &'static str, InjectPolicy)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
