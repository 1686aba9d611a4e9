//! Red-black tree used as the ordered index of every block
//!
//! Nodes live in an arena; slot 0 is the black, childless sentinel that
//! terminates every leaf path, so boundary checks compare against `NIL`
//! instead of unwrapping options. Removed slots are recycled.
//!
//! Properties kept after every mutation:
//!  1) the root is black
//!  2) both children of a red node are black
//!  3) every root-to-leaf path has the same number of black nodes

use std::cmp::Ordering;
use std::fmt;
use std::mem;

const NIL: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<K, V> {
    entry: Option<(K, V)>,
    color: Color,
    left: usize,
    right: usize,
    parent: usize,
}

impl<K, V> Node<K, V> {
    fn sentinel() -> Self {
        Self {
            entry: None,
            color: Color::Black,
            left: NIL,
            right: NIL,
            parent: NIL,
        }
    }
}

/// Balanced binary search tree with O(log n) insert, lookup and delete
pub struct RbTree<K, V> {
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    root: usize,
    len: usize,
}

impl<K: Ord, V> RbTree<K, V> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a key-value pair
    ///
    /// An existing key keeps its node and has its value replaced; the old
    /// value is returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut parent = NIL;
        let mut x = self.root;
        while x != NIL {
            parent = x;
            match key.cmp(self.key(x)) {
                Ordering::Less => x = self.nodes[x].left,
                Ordering::Greater => x = self.nodes[x].right,
                Ordering::Equal => {
                    return self.nodes[x]
                        .entry
                        .as_mut()
                        .map(|(_, v)| mem::replace(v, value));
                }
            }
        }

        let z = self.alloc(key, value);
        self.nodes[z].parent = parent;
        if parent == NIL {
            self.root = z;
        } else if self.key(z) < self.key(parent) {
            self.nodes[parent].left = z;
        } else {
            self.nodes[parent].right = z;
        }

        self.len += 1;
        self.insert_fixup(z);
        None
    }

    /// Point lookup
    pub fn get(&self, key: &K) -> Option<&V> {
        let n = self.find_node(key);
        self.nodes[n].entry.as_ref().map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_node(key) != NIL
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let z = self.find_node(key);
        if z == NIL {
            return None;
        }

        let mut y = z;
        let mut y_color = self.nodes[y].color;
        let x;

        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            self.transplant(z, x);
        } else {
            y = self.minimum(self.nodes[z].right);
            y_color = self.nodes[y].color;
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                self.nodes[y].right = self.nodes[z].right;
                let r = self.nodes[y].right;
                self.nodes[r].parent = y;
            }
            self.transplant(z, y);
            self.nodes[y].left = self.nodes[z].left;
            let l = self.nodes[y].left;
            self.nodes[l].parent = y;
            self.nodes[y].color = self.nodes[z].color;
        }

        if y_color == Color::Black {
            self.delete_fixup(x);
        }
        self.nodes[NIL].parent = NIL;

        self.len -= 1;
        self.release(z).map(|(_, v)| v)
    }

    /// Smallest key and its value
    pub fn min(&self) -> Option<(&K, &V)> {
        if self.root == NIL {
            return None;
        }
        self.pair(self.minimum(self.root))
    }

    /// Largest key and its value
    pub fn max(&self) -> Option<(&K, &V)> {
        if self.root == NIL {
            return None;
        }
        let mut x = self.root;
        while self.nodes[x].right != NIL {
            x = self.nodes[x].right;
        }
        self.pair(x)
    }

    /// Pairs with `lo <= key < hi`, in ascending key order
    pub fn range(&self, lo: &K, hi: &K) -> Vec<(&K, &V)> {
        let mut out = Vec::new();
        self.ascend_range(self.root, lo, hi, &mut |k, v| {
            out.push((k, v));
            true
        });
        out
    }

    /// Visit keys `>= pivot` in ascending order until the visitor returns false
    pub fn ascend<F>(&self, pivot: &K, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.ascend_from(self.root, pivot, &mut visit);
    }

    /// Visit keys `<= pivot` in descending order until the visitor returns false
    pub fn descend<F>(&self, pivot: &K, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.descend_from(self.root, pivot, &mut visit);
    }

    /// In-order iterator over every pair
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tree: self,
            stack: Vec::new(),
            current: self.root,
        }
    }

    fn key(&self, n: usize) -> &K {
        match &self.nodes[n].entry {
            Some((k, _)) => k,
            None => unreachable!("sentinel or released node has no key"),
        }
    }

    fn pair(&self, n: usize) -> Option<(&K, &V)> {
        self.nodes[n].entry.as_ref().map(|(k, v)| (k, v))
    }

    fn find_node(&self, key: &K) -> usize {
        let mut x = self.root;
        while x != NIL {
            match key.cmp(self.key(x)) {
                Ordering::Less => x = self.nodes[x].left,
                Ordering::Greater => x = self.nodes[x].right,
                Ordering::Equal => return x,
            }
        }
        NIL
    }

    fn minimum(&self, mut x: usize) -> usize {
        while self.nodes[x].left != NIL {
            x = self.nodes[x].left;
        }
        x
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        let node = Node {
            entry: Some((key, value)),
            color: Color::Red,
            left: NIL,
            right: NIL,
            parent: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, n: usize) -> Option<(K, V)> {
        let entry = self.nodes[n].entry.take();
        self.nodes[n].left = NIL;
        self.nodes[n].right = NIL;
        self.nodes[n].parent = NIL;
        self.free.push(n);
        entry
    }

    fn left_rotate(&mut self, x: usize) {
        let y = self.nodes[x].right;
        if y == NIL {
            return;
        }

        //      |                     |
        //      X                     Y
        //     / \    left rotate    / \
        //    a   Y   ---------->   X   c
        //       / \               / \
        //      b   c             a   b
        let b = self.nodes[y].left;
        self.nodes[x].right = b;
        if b != NIL {
            self.nodes[b].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp].left {
            self.nodes[xp].left = y;
        } else {
            self.nodes[xp].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn right_rotate(&mut self, x: usize) {
        let y = self.nodes[x].left;
        if y == NIL {
            return;
        }

        let b = self.nodes[y].right;
        self.nodes[x].left = b;
        if b != NIL {
            self.nodes[b].parent = x;
        }
        let xp = self.nodes[x].parent;
        self.nodes[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.nodes[xp].right {
            self.nodes[xp].right = y;
        } else {
            self.nodes[xp].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.nodes[self.nodes[z].parent].color == Color::Red {
            let p = self.nodes[z].parent;
            let g = self.nodes[p].parent;
            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.nodes[uncle].color == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.left_rotate(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.right_rotate(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.nodes[uncle].color == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.right_rotate(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.left_rotate(g);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    fn transplant(&mut self, u: usize, v: usize) {
        let up = self.nodes[u].parent;
        if up == NIL {
            self.root = v;
        } else if u == self.nodes[up].left {
            self.nodes[up].left = v;
        } else {
            self.nodes[up].right = v;
        }
        self.nodes[v].parent = up;
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && self.nodes[x].color == Color::Black {
            let p = self.nodes[x].parent;
            if x == self.nodes[p].left {
                let mut w = self.nodes[p].right;
                if self.nodes[w].color == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.left_rotate(p);
                    w = self.nodes[self.nodes[x].parent].right;
                }
                let (wl, wr) = (self.nodes[w].left, self.nodes[w].right);
                if self.nodes[wl].color == Color::Black && self.nodes[wr].color == Color::Black {
                    self.nodes[w].color = Color::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[wr].color == Color::Black {
                        self.nodes[wl].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.right_rotate(w);
                        w = self.nodes[self.nodes[x].parent].right;
                    }
                    let p = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[p].color;
                    self.nodes[p].color = Color::Black;
                    let wr = self.nodes[w].right;
                    self.nodes[wr].color = Color::Black;
                    self.left_rotate(p);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[p].left;
                if self.nodes[w].color == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.right_rotate(p);
                    w = self.nodes[self.nodes[x].parent].left;
                }
                let (wl, wr) = (self.nodes[w].left, self.nodes[w].right);
                if self.nodes[wl].color == Color::Black && self.nodes[wr].color == Color::Black {
                    self.nodes[w].color = Color::Red;
                    x = self.nodes[x].parent;
                } else {
                    if self.nodes[wl].color == Color::Black {
                        self.nodes[wr].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.left_rotate(w);
                        w = self.nodes[self.nodes[x].parent].left;
                    }
                    let p = self.nodes[x].parent;
                    self.nodes[w].color = self.nodes[p].color;
                    self.nodes[p].color = Color::Black;
                    let wl = self.nodes[w].left;
                    self.nodes[wl].color = Color::Black;
                    self.right_rotate(p);
                    x = self.root;
                }
            }
        }
        self.nodes[x].color = Color::Black;
    }

    fn ascend_from<'a, F>(&'a self, x: usize, pivot: &K, visit: &mut F) -> bool
    where
        F: FnMut(&'a K, &'a V) -> bool,
    {
        if x == NIL {
            return true;
        }
        let key = self.key(x);
        if key >= pivot {
            if !self.ascend_from(self.nodes[x].left, pivot, visit) {
                return false;
            }
            if let Some((k, v)) = self.pair(x) {
                if !visit(k, v) {
                    return false;
                }
            }
        }
        self.ascend_from(self.nodes[x].right, pivot, visit)
    }

    fn descend_from<'a, F>(&'a self, x: usize, pivot: &K, visit: &mut F) -> bool
    where
        F: FnMut(&'a K, &'a V) -> bool,
    {
        if x == NIL {
            return true;
        }
        let key = self.key(x);
        if key <= pivot {
            if !self.descend_from(self.nodes[x].right, pivot, visit) {
                return false;
            }
            if let Some((k, v)) = self.pair(x) {
                if !visit(k, v) {
                    return false;
                }
            }
        }
        self.descend_from(self.nodes[x].left, pivot, visit)
    }

    fn ascend_range<'a, F>(&'a self, x: usize, lo: &K, hi: &K, visit: &mut F) -> bool
    where
        F: FnMut(&'a K, &'a V) -> bool,
    {
        if x == NIL {
            return true;
        }
        let key = self.key(x);
        if key >= lo {
            if !self.ascend_range(self.nodes[x].left, lo, hi, visit) {
                return false;
            }
            if key < hi {
                if let Some((k, v)) = self.pair(x) {
                    if !visit(k, v) {
                        return false;
                    }
                }
            }
        }
        if key < hi {
            return self.ascend_range(self.nodes[x].right, lo, hi, visit);
        }
        true
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug> fmt::Debug for RbTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-order iterator
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    stack: Vec<usize>,
    current: usize,
}

impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.current != NIL {
            self.stack.push(self.current);
            self.current = self.tree.nodes[self.current].left;
        }
        let n = self.stack.pop()?;
        self.current = self.tree.nodes[n].right;
        self.tree.pair(n)
    }
}
