use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap, str::FromStr};

use crate::model::{Category, Product, ValidationError};

pub const DEFAULT_PAGE_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl FromStr for CategoryFilter {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(CategoryFilter::All)
        } else {
            s.parse().map(CategoryFilter::Only)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceRange {
    #[default]
    All,
    #[serde(rename = "under-100")]
    Under100,
    #[serde(rename = "100-500")]
    From100To500,
    #[serde(rename = "over-500")]
    Over500,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        match self {
            PriceRange::All => true,
            PriceRange::Under100 => price < 100.0,
            PriceRange::From100To500 => (100.0..=500.0).contains(&price),
            PriceRange::Over500 => price > 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    #[default]
    Latest,
    Rating,
    PriceLow,
    PriceHigh,
    Discount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingQuery {
    pub category: CategoryFilter,
    pub price: PriceRange,
    pub deals_only: bool,
    pub search: Option<String>,
    pub sort: SortKey,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            category: CategoryFilter::All,
            price: PriceRange::All,
            deals_only: false,
            search: None,
            sort: SortKey::Latest,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

pub fn matches(p: &Product, q: &ListingQuery) -> bool {
    if let CategoryFilter::Only(c) = q.category {
        if p.category != c {
            return false;
        }
    }
    if !q.price.contains(p.price) {
        return false;
    }
    if q.deals_only && !p.is_deal() {
        return false;
    }
    match q.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => {
            let term = term.to_lowercase();
            p.title.to_lowercase().contains(&term)
                || p.description.to_lowercase().contains(&term)
                || p.category.as_str().to_lowercase().contains(&term)
        }
        _ => true,
    }
}

pub fn filter<'a>(products: &'a [Product], q: &ListingQuery) -> Vec<&'a Product> {
    products.iter().filter(|p| matches(p, q)).collect()
}

fn by_f64(a: f64, b: f64) -> Ordering { a.total_cmp(&b) }

/// Orders by the chosen key only; ties keep their input order.
pub fn sort(items: &mut [&Product], key: SortKey) {
    match key {
        SortKey::Latest => items.sort_by(|a, b| b.publish_date.cmp(&a.publish_date)),
        SortKey::Rating => items.sort_by(|a, b| by_f64(b.rating, a.rating)),
        SortKey::PriceLow => items.sort_by(|a, b| by_f64(a.price, b.price)),
        SortKey::PriceHigh => items.sort_by(|a, b| by_f64(b.price, a.price)),
        SortKey::Discount => items.sort_by(|a, b| by_f64(b.discount.unwrap_or(0.0), a.discount.unwrap_or(0.0))),
    }
}

pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let page = page.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size).min(total_items);
    let end = start.saturating_add(page_size).min(total_items);
    Page { items: items[start..end].to_vec(), page, page_size, total_items, total_pages }
}

/// Filter, sort, then cut out the requested page.
pub fn list<'a>(products: &'a [Product], q: &ListingQuery) -> Page<&'a Product> {
    let mut items = filter(products, q);
    sort(&mut items, q.sort);
    paginate(&items, q.page, q.page_size)
}

/// Product count per category, for the browsing sidebar. Every category is present.
pub fn category_counts(products: &[Product]) -> BTreeMap<Category, usize> {
    let mut counts: BTreeMap<Category, usize> = Category::ALL.iter().map(|c| (*c, 0)).collect();
    for p in products {
        *counts.entry(p.category).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn product(title: &str, category: Category, price: f64, rating: f64, age_days: i64) -> Product {
        let mut p = Product::new(title, category, "tester");
        p.price = price;
        p.rating = rating;
        p.publish_date = Utc::now() - Duration::days(age_days);
        p.description = format!("All about the {title}");
        p
    }

    fn catalog() -> Vec<Product> {
        let mut v = vec![
            product("Xbox Controller", Category::Gaming, 100.0, 4.5, 3),
            product("Gaming Mouse", Category::Gaming, 50.0, 4.8, 1),
            product("ThinkPad X1", Category::Laptops, 200.0, 4.1, 2),
            product("Nest Hub", Category::SmartHome, 99.0, 3.9, 5),
            product("OLED Monitor", Category::Gaming, 899.0, 4.8, 4),
            product("Galaxy S24", Category::Smartphones, 799.0, 4.4, 0),
            product("Ring Doorbell", Category::SmartHome, 120.0, 4.0, 6),
        ];
        v[3].discount = Some(25.0);
        v[4].on_sale = Some(true);
        v[6].discount = Some(10.0);
        v
    }

    fn prices(items: &[&Product]) -> Vec<f64> { items.iter().map(|p| p.price).collect() }

    #[test]
    fn gaming_sorted_by_price_ascending() {
        let products = vec![
            product("A", Category::Gaming, 100.0, 4.0, 1),
            product("B", Category::Gaming, 50.0, 4.0, 1),
            product("C", Category::Laptops, 200.0, 4.0, 1),
        ];
        let q = ListingQuery { category: CategoryFilter::Only(Category::Gaming), sort: SortKey::PriceLow, ..Default::default() };
        assert_eq!(prices(&list(&products, &q).items), vec![50.0, 100.0]);
    }

    #[test]
    fn all_filter_is_superset() {
        let products = catalog();
        let gaming = filter(&products, &ListingQuery { category: "Gaming".parse().unwrap(), ..Default::default() });
        let all = filter(&products, &ListingQuery { category: "All".parse().unwrap(), ..Default::default() });
        assert_eq!(all.len(), products.len());
        assert!(gaming.iter().all(|g| all.iter().any(|a| a.id == g.id)));
    }

    #[test]
    fn rating_sorts_keep_the_same_multiset() {
        let products = catalog();
        let mut items = filter(&products, &ListingQuery::default());
        sort(&mut items, SortKey::Rating);
        let desc: Vec<f64> = items.iter().map(|p| p.rating).collect();
        assert!(desc.windows(2).all(|w| w[0] >= w[1]));

        items.sort_by(|a, b| a.rating.total_cmp(&b.rating));
        let mut asc: Vec<f64> = items.iter().map(|p| p.rating).collect();
        asc.reverse();
        assert_eq!(asc, desc);
        assert_eq!(items.len(), products.len());
    }

    #[test]
    fn latest_price_and_discount_orders() {
        let products = catalog();
        let mut items = filter(&products, &ListingQuery::default());

        sort(&mut items, SortKey::Latest);
        assert_eq!(items[0].title, "Galaxy S24");
        assert_eq!(items.last().unwrap().title, "Ring Doorbell");

        sort(&mut items, SortKey::PriceHigh);
        assert_eq!(items[0].price, 899.0);

        sort(&mut items, SortKey::Discount);
        assert_eq!(items[0].title, "Nest Hub");
        assert_eq!(items[1].title, "Ring Doorbell");
    }

    #[test]
    fn deals_and_price_ranges() {
        let products = catalog();
        let deals = filter(&products, &ListingQuery { deals_only: true, ..Default::default() });
        assert_eq!(deals.len(), 3);

        let mid = filter(&products, &ListingQuery { price: PriceRange::From100To500, ..Default::default() });
        assert_eq!(mid.len(), 3);
        let cheap = filter(&products, &ListingQuery { price: PriceRange::Under100, ..Default::default() });
        assert_eq!(prices(&cheap), vec![50.0, 99.0]);
    }

    #[test]
    fn search_is_case_insensitive() {
        let products = catalog();
        let hits = filter(&products, &ListingQuery { search: Some("  thinkPAD ".into()), ..Default::default() });
        assert_eq!(hits.len(), 1);
        let by_category = filter(&products, &ListingQuery { search: Some("smart home".into()), ..Default::default() });
        assert_eq!(by_category.len(), 2);
    }

    #[test]
    fn pages_reconstruct_the_full_list() {
        let products = catalog();
        let q = ListingQuery { sort: SortKey::PriceLow, page_size: 3, ..Default::default() };
        let first = list(&products, &q);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.total_items, 7);

        let mut seen = Vec::new();
        for page in 1..=first.total_pages {
            seen.extend(list(&products, &ListingQuery { page, ..q.clone() }).items);
        }
        let mut full = filter(&products, &q);
        sort(&mut full, q.sort);
        assert_eq!(seen.len(), full.len());
        assert!(seen.iter().zip(&full).all(|(a, b)| a.id == b.id));

        assert!(list(&products, &ListingQuery { page: 9, ..q }).items.is_empty());
    }

    #[test]
    fn category_counts_cover_every_category() {
        let counts = category_counts(&catalog());
        assert_eq!(counts[&Category::Gaming], 3);
        assert_eq!(counts[&Category::Laptops], 1);
        assert_eq!(counts.len(), 4);
    }
}
