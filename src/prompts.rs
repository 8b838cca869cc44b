use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::Category;

/// One product to write a review for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRequest {
	pub category: Category,
	pub product_name: String,
	pub base_price: f64,
	#[serde(default)]
	pub specifications: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPrompts {
	pub review: String,
	pub seo: String,
	pub pros_cons: String,
}

impl ReviewPrompts {
	pub fn build(req: &ProductRequest) -> Self {
		let specs = req
			.specifications
			.iter()
			.map(|(k, v)| format!("{k}: {v}"))
			.collect::<Vec<_>>()
			.join("\n");

		let review = format!(
			"Write a detailed product review for {product} in the {category} category.\n\
			 Include the following sections:\n\
			 1. Brief overview (2-3 sentences)\n\
			 2. Detailed analysis of key features\n\
			 3. Performance evaluation\n\
			 4. Build quality and design\n\
			 5. Value for money\n\
			 6. Pros (3-5 points)\n\
			 7. Cons (2-3 points)\n\
			 8. Final verdict\n\n\
			 Separate paragraphs with a blank line. The reference price is ${price:.2}.\n\n\
			 Specifications to consider:\n{specs}\n",
			product = req.product_name,
			category = req.category,
			price = req.base_price,
		);

		let seo = format!(
			"Generate SEO metadata for a product review of {product}.\n\
			 Reply with exactly three blocks separated by a blank line:\n\
			 Meta title: <50-60 characters>\n\n\
			 Meta description: <150-160 characters>\n\n\
			 Keywords: <5-7 comma separated focus keywords>\n\n\
			 Consider the product category: {category}",
			product = req.product_name,
			category = req.category,
		);

		let pros_cons = format!(
			"List the main pros and cons for {product}.\n\
			 Consider: performance, features, price, build quality, and user experience.\n\
			 Format the answer as a line \"Pros:\" followed by dash bullets, a blank line, \
			 then a line \"Cons:\" followed by dash bullets.",
			product = req.product_name,
		);

		Self { review, seo, pros_cons }
	}
}

const PHOTO_STYLE: &str = "white background, studio lighting, photorealistic";

/// Hero shot first, then the three gallery angles.
pub fn image_prompts(req: &ProductRequest) -> (String, [String; 3]) {
	let hero = format!(
		"Professional product photo of {}, {}, {PHOTO_STYLE}",
		req.product_name, req.category
	);
	let gallery = ["from front angle", "from side view", "close-up details"]
		.map(|angle| format!("Professional product photo of {} {angle}, {PHOTO_STYLE}", req.product_name));
	(hero, gallery)
}

/// Single-call prompt asking the model for the whole record as JSON.
pub fn structured_prompt(category: Category) -> String {
	format!(
		r#"Generate a realistic tech product review for a {category} product.
Reply with a single JSON object and nothing else, using this structure:
{{
  "name": "Product Name",
  "description": "Detailed product description",
  "features": ["Feature 1", "Feature 2", "Feature 3"],
  "pros": ["Pro 1", "Pro 2", "Pro 3"],
  "cons": ["Con 1", "Con 2"],
  "specifications": {{ "key1": "value1", "key2": "value2" }},
  "price": 999.99,
  "rating": 4.5
}}
The rating must be between 0 and 5 and the price must not be negative."#
	)
}
