//! Red-black tree used as the ordered secondary index
//!
//! Nodes live in a dense arena and link to each other by index. Removing a
//! node swaps the last arena slot into the hole and patches the moved
//! node's neighbours, so the arena never holds dead slots.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<K, V> {
    key: K,
    value: V,
    color: Color,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
}

/// Balanced ordered map supporting in-order and range traversal
pub struct OrderedIndex<K, V> {
    nodes: Vec<Node<K, V>>,
    root: Option<usize>,
}

impl<K, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrderedIndex<K, V> {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    fn color(&self, node: Option<usize>) -> Color {
        node.map_or(Color::Black, |i| self.nodes[i].color)
    }

    fn is_red(&self, node: usize) -> bool {
        self.nodes[node].color == Color::Red
    }

    fn minimum(&self, mut node: usize) -> usize {
        while let Some(left) = self.nodes[node].left {
            node = left;
        }
        node
    }

    fn maximum(&self, mut node: usize) -> usize {
        while let Some(right) = self.nodes[node].right {
            node = right;
        }
        node
    }

    /// Smallest key and its value
    pub fn first(&self) -> Option<(&K, &V)> {
        let node = &self.nodes[self.minimum(self.root?)];
        Some((&node.key, &node.value))
    }

    /// Largest key and its value
    pub fn last(&self) -> Option<(&K, &V)> {
        let node = &self.nodes[self.maximum(self.root?)];
        Some((&node.key, &node.value))
    }

    /// Point `parent`'s link that referenced `old` at `new` instead
    fn replace_child(&mut self, parent: Option<usize>, old: usize, new: Option<usize>) {
        match parent {
            None => self.root = new,
            Some(p) if self.nodes[p].left == Some(old) => self.nodes[p].left = new,
            Some(p) => self.nodes[p].right = new,
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let Some(y) = self.nodes[x].right else {
            return;
        };
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if let Some(b) = y_left {
            self.nodes[b].parent = Some(x);
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        self.replace_child(x_parent, x, Some(y));
        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);
    }

    fn rotate_right(&mut self, x: usize) {
        let Some(y) = self.nodes[x].left else {
            return;
        };
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if let Some(b) = y_right {
            self.nodes[b].parent = Some(x);
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        self.replace_child(x_parent, x, Some(y));
        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);
    }

    /// Put subtree `v` where subtree `u` was
    fn transplant(&mut self, u: usize, v: Option<usize>) {
        let u_parent = self.nodes[u].parent;
        self.replace_child(u_parent, u, v);
        if let Some(v) = v {
            self.nodes[v].parent = u_parent;
        }
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while let Some(mut p) = self.nodes[z].parent {
            if !self.is_red(p) {
                break;
            }
            // A red parent is never the root, so the grandparent exists
            let Some(g) = self.nodes[p].parent else {
                break;
            };

            if self.nodes[g].left == Some(p) {
                if let Some(uncle) = self.nodes[g].right.filter(|&u| self.is_red(u)) {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                    continue;
                }
                if self.nodes[p].right == Some(z) {
                    self.rotate_left(p);
                    std::mem::swap(&mut z, &mut p);
                }
                self.nodes[p].color = Color::Black;
                self.nodes[g].color = Color::Red;
                self.rotate_right(g);
            } else {
                if let Some(uncle) = self.nodes[g].left.filter(|&u| self.is_red(u)) {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                    continue;
                }
                if self.nodes[p].left == Some(z) {
                    self.rotate_right(p);
                    std::mem::swap(&mut z, &mut p);
                }
                self.nodes[p].color = Color::Black;
                self.nodes[g].color = Color::Red;
                self.rotate_left(g);
            }
        }

        if let Some(root) = self.root {
            self.nodes[root].color = Color::Black;
        }
    }

    /// Restore the black-height after removing a black node. `x` took the
    /// removed node's place and may be empty, hence the explicit parent.
    fn remove_fixup(&mut self, mut x: Option<usize>, mut parent: Option<usize>) {
        while x != self.root && self.color(x) == Color::Black {
            let Some(p) = parent else {
                break;
            };

            if self.nodes[p].left == x {
                let mut sibling = self.nodes[p].right;
                if let Some(s) = sibling.filter(|&s| self.is_red(s)) {
                    self.nodes[s].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.rotate_left(p);
                    sibling = self.nodes[p].right;
                }
                let Some(mut s) = sibling else {
                    x = Some(p);
                    parent = self.nodes[p].parent;
                    continue;
                };

                if self.color(self.nodes[s].left) == Color::Black
                    && self.color(self.nodes[s].right) == Color::Black
                {
                    self.nodes[s].color = Color::Red;
                    x = Some(p);
                    parent = self.nodes[p].parent;
                    continue;
                }

                if self.color(self.nodes[s].right) == Color::Black {
                    if let Some(near) = self.nodes[s].left {
                        self.nodes[near].color = Color::Black;
                    }
                    self.nodes[s].color = Color::Red;
                    self.rotate_right(s);
                    match self.nodes[p].right {
                        Some(next) => s = next,
                        None => break,
                    }
                }
                self.nodes[s].color = self.nodes[p].color;
                self.nodes[p].color = Color::Black;
                if let Some(far) = self.nodes[s].right {
                    self.nodes[far].color = Color::Black;
                }
                self.rotate_left(p);
                x = self.root;
                parent = None;
            } else {
                let mut sibling = self.nodes[p].left;
                if let Some(s) = sibling.filter(|&s| self.is_red(s)) {
                    self.nodes[s].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.rotate_right(p);
                    sibling = self.nodes[p].left;
                }
                let Some(mut s) = sibling else {
                    x = Some(p);
                    parent = self.nodes[p].parent;
                    continue;
                };

                if self.color(self.nodes[s].left) == Color::Black
                    && self.color(self.nodes[s].right) == Color::Black
                {
                    self.nodes[s].color = Color::Red;
                    x = Some(p);
                    parent = self.nodes[p].parent;
                    continue;
                }

                if self.color(self.nodes[s].left) == Color::Black {
                    if let Some(near) = self.nodes[s].right {
                        self.nodes[near].color = Color::Black;
                    }
                    self.nodes[s].color = Color::Red;
                    self.rotate_left(s);
                    match self.nodes[p].left {
                        Some(next) => s = next,
                        None => break,
                    }
                }
                self.nodes[s].color = self.nodes[p].color;
                self.nodes[p].color = Color::Black;
                if let Some(far) = self.nodes[s].left {
                    self.nodes[far].color = Color::Black;
                }
                self.rotate_right(p);
                x = self.root;
                parent = None;
            }
        }

        if let Some(x) = x {
            self.nodes[x].color = Color::Black;
        }
    }

    /// Drop an unlinked node from the arena, moving the last node into its
    /// slot and re-pointing that node's neighbours.
    fn release(&mut self, z: usize) -> V {
        let last = self.nodes.len() - 1;
        let removed = self.nodes.swap_remove(z);

        if z != last {
            let parent = self.nodes[z].parent;
            self.replace_child(parent, last, Some(z));
            if let Some(left) = self.nodes[z].left {
                self.nodes[left].parent = Some(z);
            }
            if let Some(right) = self.nodes[z].right {
                self.nodes[right].parent = Some(z);
            }
        }

        removed.value
    }
}

impl<K: Ord, V> OrderedIndex<K, V> {
    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while let Some(i) = cur {
            match Ord::cmp(key, Borrow::<Q>::borrow(&self.nodes[i].key)) {
                Ordering::Less => cur = self.nodes[i].left,
                Ordering::Greater => cur = self.nodes[i].right,
                Ordering::Equal => return Some(i),
            }
        }
        None
    }

    /// Look up the value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).map(|i| &self.nodes[i].value)
    }

    /// Check whether `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Insert `key`, rebalancing as needed
    ///
    /// If the key was already present its value is replaced and the old
    /// value returned; the tree shape does not change.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut parent = None;
        let mut went_left = false;
        let mut cur = self.root;

        while let Some(i) = cur {
            parent = Some(i);
            match key.cmp(&self.nodes[i].key) {
                Ordering::Less => {
                    went_left = true;
                    cur = self.nodes[i].left;
                }
                Ordering::Greater => {
                    went_left = false;
                    cur = self.nodes[i].right;
                }
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.nodes[i].value, value));
                }
            }
        }

        let z = self.nodes.len();
        self.nodes.push(Node {
            key,
            value,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });
        match parent {
            None => self.root = Some(z),
            Some(p) if went_left => self.nodes[p].left = Some(z),
            Some(p) => self.nodes[p].right = Some(z),
        }

        self.insert_fixup(z);
        None
    }

    /// Remove `key`, returning its value
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let z = self.find(key)?;
        let mut removed_color = self.nodes[z].color;
        let x;
        let x_parent;

        match (self.nodes[z].left, self.nodes[z].right) {
            (None, right) => {
                x = right;
                x_parent = self.nodes[z].parent;
                self.transplant(z, right);
            }
            (left, None) => {
                x = left;
                x_parent = self.nodes[z].parent;
                self.transplant(z, left);
            }
            (Some(left), Some(right)) => {
                // Successor takes z's place and colour
                let y = self.minimum(right);
                removed_color = self.nodes[y].color;
                x = self.nodes[y].right;

                if self.nodes[y].parent == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = self.nodes[y].parent;
                    self.transplant(y, x);
                    self.nodes[y].right = Some(right);
                    self.nodes[right].parent = Some(y);
                }

                self.transplant(z, Some(y));
                self.nodes[y].left = Some(left);
                self.nodes[left].parent = Some(y);
                self.nodes[y].color = self.nodes[z].color;
            }
        }

        if removed_color == Color::Black {
            self.remove_fixup(x, x_parent);
        }
        Some(self.release(z))
    }

    /// Lazy in-order traversal of the keys within `low..high`
    ///
    /// The returned iterator is `Clone`; cloning it before consuming gives
    /// a restartable view of the same range.
    pub fn range<'a, Q>(&'a self, low: Bound<&'a Q>, high: Bound<&'a Q>) -> Range<'a, K, V, Q>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut stack = Vec::new();
        let mut cur = self.root;
        while let Some(i) = cur {
            let key = Borrow::<Q>::borrow(&self.nodes[i].key);
            let above_low = match low {
                Bound::Unbounded => true,
                Bound::Included(l) => key >= l,
                Bound::Excluded(l) => key > l,
            };
            if above_low {
                stack.push(i);
                cur = self.nodes[i].left;
            } else {
                cur = self.nodes[i].right;
            }
        }

        Range {
            tree: self,
            stack,
            high,
        }
    }

    /// Lazy in-order traversal of every key
    pub fn iter(&self) -> Range<'_, K, V, K> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Verify colouring, black-height, ordering and parent links.
    /// Returns the black-height on success.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> std::result::Result<usize, String> {
        fn walk<K: Ord, V>(
            tree: &OrderedIndex<K, V>,
            node: Option<usize>,
            parent: Option<usize>,
            count: &mut usize,
        ) -> std::result::Result<usize, String> {
            let Some(i) = node else {
                return Ok(1);
            };
            *count += 1;
            let n = &tree.nodes[i];
            if n.parent != parent {
                return Err(format!("node {} has a stale parent link", i));
            }
            if n.color == Color::Red
                && (tree.color(n.left) == Color::Red || tree.color(n.right) == Color::Red)
            {
                return Err(format!("red node {} has a red child", i));
            }
            if let Some(l) = n.left {
                if tree.nodes[l].key >= n.key {
                    return Err(format!("left child of {} out of order", i));
                }
            }
            if let Some(r) = n.right {
                if tree.nodes[r].key <= n.key {
                    return Err(format!("right child of {} out of order", i));
                }
            }
            let left = walk(tree, n.left, Some(i), count)?;
            let right = walk(tree, n.right, Some(i), count)?;
            if left != right {
                return Err(format!("black-height mismatch under {}", i));
            }
            Ok(left + usize::from(n.color == Color::Black))
        }

        if self.color(self.root) != Color::Black {
            return Err("root is red".to_string());
        }
        let mut count = 0;
        let height = walk(self, self.root, None, &mut count)?;
        if count != self.nodes.len() {
            return Err(format!("{} reachable nodes, {} in arena", count, self.nodes.len()));
        }
        let keys: Vec<&K> = self.iter().map(|(k, _)| k).collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err("in-order walk not strictly ascending".to_string());
        }
        Ok(height)
    }
}

/// In-order iterator over a key range of an [`OrderedIndex`]
pub struct Range<'a, K, V, Q: ?Sized> {
    tree: &'a OrderedIndex<K, V>,
    stack: Vec<usize>,
    high: Bound<&'a Q>,
}

impl<K, V, Q: ?Sized> Clone for Range<'_, K, V, Q> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            stack: self.stack.clone(),
            high: self.high,
        }
    }
}

impl<'a, K, V, Q> Iterator for Range<'a, K, V, Q>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        let i = self.stack.pop()?;
        let node = &tree.nodes[i];

        let key = Borrow::<Q>::borrow(&node.key);
        let below_high = match self.high {
            Bound::Unbounded => true,
            Bound::Included(h) => key <= h,
            Bound::Excluded(h) => key < h,
        };
        if !below_high {
            self.stack.clear();
            return None;
        }

        let mut cur = node.right;
        while let Some(c) = cur {
            self.stack.push(c);
            cur = tree.nodes[c].left;
        }
        Some((&node.key, &node.value))
    }
}
