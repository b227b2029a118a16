use crate::types::Rect;

const MAX_ITEMS: usize = 8;
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone)]
struct Quad<T> {
    bounds: Rect,
    depth: usize,
    // Items that straddle a split line stay at this level.
    items: Vec<(Rect, T)>,
    children: Option<Box<[Quad<T>; 4]>>,
}

impl<T> Quad<T> {
    fn new(bounds: Rect, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    fn split(&mut self) {
        let half_w = self.bounds.width / 2.0;
        let half_h = self.bounds.height / 2.0;
        let (x, y, d) = (self.bounds.x, self.bounds.y, self.depth + 1);
        self.children = Some(Box::new([
            Quad::new(Rect::new(x, y, half_w, half_h), d),
            Quad::new(Rect::new(x + half_w, y, half_w, half_h), d),
            Quad::new(Rect::new(x, y + half_h, half_w, half_h), d),
            Quad::new(Rect::new(x + half_w, y + half_h, half_w, half_h), d),
        ]));

        let items = std::mem::take(&mut self.items);
        for (rect, item) in items {
            self.insert(rect, item);
        }
    }

    fn insert(&mut self, rect: Rect, item: T) {
        if let Some(children) = self.children.as_mut() {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.contains_rect(&rect)) {
                child.insert(rect, item);
                return;
            }
            self.items.push((rect, item));
            return;
        }

        self.items.push((rect, item));
        if self.items.len() > MAX_ITEMS && self.depth < MAX_DEPTH {
            self.split();
        }
    }

    fn query<'a>(&'a self, region: &Rect, out: &mut Vec<&'a T>) {
        out.extend(
            self.items
                .iter()
                .filter(|(rect, _)| rect.intersects(region))
                .map(|(_, item)| item),
        );
        if let Some(children) = &self.children {
            for child in children.iter() {
                if child.bounds.intersects(region) {
                    child.query(region, out);
                }
            }
        }
    }
}

/// Region quadtree over rectangles.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    root: Quad<T>,
    // Items outside the root bounds are kept flat.
    outside: Vec<(Rect, T)>,
    len: usize,
}

impl<T> QuadTree<T> {
    pub fn new(bounds: Rect) -> Self {
        Self {
            root: Quad::new(bounds, 0),
            outside: Vec::new(),
            len: 0,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.root.bounds
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, rect: Rect, item: T) {
        self.len += 1;
        if self.root.bounds.contains_rect(&rect) {
            self.root.insert(rect, item);
        } else {
            self.outside.push((rect, item));
        }
    }

    /// Items whose rectangle intersects `region`.
    pub fn query(&self, region: &Rect) -> Vec<&T> {
        let mut out = Vec::new();
        if self.root.bounds.intersects(region) {
            self.root.query(region, &mut out);
        }
        out.extend(
            self.outside
                .iter()
                .filter(|(rect, _)| rect.intersects(region))
                .map(|(_, item)| item),
        );
        out
    }
}
