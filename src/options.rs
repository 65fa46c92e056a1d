use regex::Regex;

use crate::objc::ListPolicy;

/// Presentation and walking knobs shared by the library facade and the CLI.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Only dump the slice with this architecture name.
    pub arch: Option<String>,
    pub show_ivar_offsets: bool,
    pub show_method_addresses: bool,
    pub sort_classes: bool,
    /// Superclasses before their subclasses; applied after `sort_classes`.
    pub sort_by_inheritance: bool,
    pub sort_methods: bool,
    /// Leave out `.cxx_construct`.
    pub strip_ctor: bool,
    /// Leave out `.cxx_destruct`.
    pub strip_dtor: bool,
    /// Leave out methods that a declared property already implies.
    pub hide_property_accessors: bool,
    /// Matched against class, protocol and category names (and a category's class).
    pub class_filter: Option<Regex>,
    pub show_header: bool,
    /// How many levels of named structs are written out inline.
    pub expand_depth: usize,
    pub strict_lists: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            arch: None,
            show_ivar_offsets: false,
            show_method_addresses: false,
            sort_classes: false,
            sort_by_inheritance: false,
            sort_methods: false,
            strip_ctor: false,
            strip_dtor: false,
            hide_property_accessors: false,
            class_filter: None,
            show_header: true,
            expand_depth: 1,
            strict_lists: false,
        }
    }
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn show_ivar_offsets(mut self, show: bool) -> Self {
        self.show_ivar_offsets = show;
        self
    }

    pub fn show_method_addresses(mut self, show: bool) -> Self {
        self.show_method_addresses = show;
        self
    }

    pub fn sort_classes(mut self, sort: bool) -> Self {
        self.sort_classes = sort;
        self
    }

    pub fn sort_by_inheritance(mut self, sort: bool) -> Self {
        self.sort_by_inheritance = sort;
        self
    }

    pub fn sort_methods(mut self, sort: bool) -> Self {
        self.sort_methods = sort;
        self
    }

    pub fn strip_ctor(mut self, strip: bool) -> Self {
        self.strip_ctor = strip;
        self
    }

    pub fn strip_dtor(mut self, strip: bool) -> Self {
        self.strip_dtor = strip;
        self
    }

    pub fn hide_property_accessors(mut self, hide: bool) -> Self {
        self.hide_property_accessors = hide;
        self
    }

    pub fn class_filter(mut self, filter: Regex) -> Self {
        self.class_filter = Some(filter);
        self
    }

    pub fn show_header(mut self, show: bool) -> Self {
        self.show_header = show;
        self
    }

    pub fn expand_depth(mut self, depth: usize) -> Self {
        self.expand_depth = depth;
        self
    }

    pub fn strict_lists(mut self, strict: bool) -> Self {
        self.strict_lists = strict;
        self
    }

    pub fn list_policy(&self) -> ListPolicy {
        if self.strict_lists {
            ListPolicy::Strict
        } else {
            ListPolicy::Salvage
        }
    }

    /// Whether a method is left out regardless of the accessor filter.
    pub fn strips(&self, selector: &str) -> bool {
        (self.strip_ctor && selector == ".cxx_construct")
            || (self.strip_dtor && selector == ".cxx_destruct")
    }

    /// Whether an entity named `name` passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        self.class_filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(name))
    }
}
