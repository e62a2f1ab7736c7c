//! Client-side pagination and search for list screens.
//!
//! Operates purely in memory over an already-synchronized collection:
//! partitions it into fixed-size pages, reveals one more page at a time,
//! and narrows by categorical filter and case-insensitive name query.
//! Every filter change recomputes the visible pages from scratch and
//! resets to the first page; only an explicit reveal advances. The
//! caller's ordering is preserved - nothing here re-sorts.

use std::sync::Arc;

use crate::utils::contains_ignore_case;

type NameFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub struct PagedList<T> {
    page_size: usize,
    display_name: NameFn<T>,
    all: Vec<T>,
    filtered: Vec<T>,
    page_index: usize,
}

impl<T: Clone> PagedList<T> {
    /// A paged list whose search matches against `display_name`.
    /// A zero page size is treated as one item per page.
    pub fn new(page_size: usize, display_name: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            page_size: page_size.max(1),
            display_name: Arc::new(display_name),
            all: Vec::new(),
            filtered: Vec::new(),
            page_index: 0,
        }
    }

    /// Replace the backing collection and reset to the first page,
    /// clearing any narrowing.
    pub fn set_items(&mut self, items: Vec<T>) {
        self.all = items;
        self.filtered = self.all.clone();
        self.page_index = 0;
    }

    /// Narrow by categorical filter, then by case-insensitive substring
    /// match of the query against each item's display name. An empty
    /// query applies no narrowing; clearing a filter is a full reset to
    /// the unfiltered first page.
    pub fn apply_filter(&mut self, query: &str, filter: Option<&dyn Fn(&T) -> bool>) {
        self.filtered = self
            .all
            .iter()
            .filter(|item| filter.map_or(true, |f| f(item)))
            .filter(|item| contains_ignore_case(&(self.display_name)(item), query))
            .cloned()
            .collect();
        self.page_index = 0;
    }

    /// Convenience for a query-only search with no categorical filter
    pub fn search(&mut self, query: &str) {
        self.apply_filter(query, None);
    }

    /// Reveal one more page. A no-op on the last page: visible items
    /// only grow until the next `set_items` or `apply_filter`.
    pub fn reveal_next_page(&mut self) {
        if self.has_more_pages() {
            self.page_index += 1;
        }
    }

    pub fn has_more_pages(&self) -> bool {
        (self.page_index + 1) * self.page_size < self.filtered.len()
    }

    /// The prefix of the filtered collection through the current page
    pub fn visible(&self) -> &[T] {
        let end = ((self.page_index + 1) * self.page_size).min(self.filtered.len());
        &self.filtered[..end]
    }

    /// How many items match the current narrowing, across all pages
    pub fn filtered_len(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Course {
        name: String,
        term: String,
    }

    fn course(name: &str, term: &str) -> Course {
        Course {
            name: name.to_string(),
            term: term.to_string(),
        }
    }

    fn named_courses(count: usize) -> Vec<Course> {
        (0..count)
            .map(|i| course(&format!("Course {:02}", i), "fall"))
            .collect()
    }

    fn paged(page_size: usize) -> PagedList<Course> {
        PagedList::new(page_size, |c: &Course| c.name.clone())
    }

    #[test]
    fn first_page_is_at_most_page_size() {
        let mut list = paged(10);
        list.set_items(named_courses(25));
        assert_eq!(list.visible().len(), 10);

        let mut short = paged(10);
        short.set_items(named_courses(3));
        assert_eq!(short.visible().len(), 3);
        assert!(!short.has_more_pages());
    }

    #[test]
    fn reveal_walks_25_items_in_pages_of_10() {
        let mut list = paged(10);
        list.set_items(named_courses(25));
        assert_eq!(list.visible().len(), 10);
        assert!(list.has_more_pages());

        list.reveal_next_page();
        assert_eq!(list.visible().len(), 20);
        assert!(list.has_more_pages());

        list.reveal_next_page();
        assert_eq!(list.visible().len(), 25);
        assert!(!list.has_more_pages());

        // A further reveal is a no-op
        list.reveal_next_page();
        assert_eq!(list.visible().len(), 25);
        assert!(!list.has_more_pages());
    }

    #[test]
    fn empty_list_has_no_pages() {
        let mut list = paged(10);
        list.set_items(Vec::new());
        assert!(list.visible().is_empty());
        assert!(!list.has_more_pages());
        list.reveal_next_page();
        assert!(list.visible().is_empty());
    }

    #[test]
    fn query_narrows_case_insensitively() {
        let mut list = paged(10);
        list.set_items(vec![
            course("Algebra", "fall"),
            course("Biology", "fall"),
            course("Advanced Biology", "spring"),
        ]);

        list.search("biology");
        assert_eq!(list.visible().len(), 2);
        assert_eq!(list.filtered_len(), 2);
    }

    #[test]
    fn clearing_the_query_restores_the_unfiltered_first_page() {
        let mut list = paged(10);
        list.set_items(named_courses(25));

        list.search("Course 1");
        // Matches "Course 10" through "Course 19"
        assert_eq!(list.filtered_len(), 10);

        list.search("");
        assert_eq!(list.filtered_len(), 25);
        assert_eq!(list.visible().len(), 10);
        assert!(list.has_more_pages());
    }

    #[test]
    fn categorical_filter_applies_before_the_query() {
        let mut list = paged(10);
        list.set_items(vec![
            course("Algebra", "fall"),
            course("Advanced Biology", "spring"),
            course("Art History", "spring"),
        ]);

        let spring_only = |c: &Course| c.term == "spring";
        list.apply_filter("a", Some(&spring_only));
        assert_eq!(list.filtered_len(), 2);

        list.apply_filter("history", Some(&spring_only));
        assert_eq!(list.filtered_len(), 1);
        assert_eq!(list.visible()[0].name, "Art History");
    }

    #[test]
    fn filter_change_resets_revealed_pages() {
        let mut list = paged(10);
        list.set_items(named_courses(25));
        list.reveal_next_page();
        assert_eq!(list.visible().len(), 20);

        list.search("Course");
        assert_eq!(list.visible().len(), 10);
    }

    #[test]
    fn reveal_pages_through_the_filtered_set() {
        let mut list = paged(5);
        list.set_items(named_courses(25));

        // "Course 1" matches 10 items: two pages of 5
        list.search("Course 1");
        assert_eq!(list.visible().len(), 5);
        assert!(list.has_more_pages());
        list.reveal_next_page();
        assert_eq!(list.visible().len(), 10);
        assert!(!list.has_more_pages());
    }

    #[test]
    fn caller_ordering_is_preserved() {
        let mut list = paged(10);
        list.set_items(vec![
            course("zoology", "fall"),
            course("Algebra", "fall"),
        ]);
        assert_eq!(list.visible()[0].name, "zoology");
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let mut list = paged(0);
        list.set_items(named_courses(3));
        assert_eq!(list.visible().len(), 1);
        assert!(list.has_more_pages());
    }
}
